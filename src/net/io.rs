//! I/O 支持：外部模型记录（JSON / RON / YAML）与 [`Net`] 之间的互相转换。
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::net::core::{ModelInconsistencyError, Net};
use crate::net::structure::{
    Arc, ArcDirection, ArcKind, ContinuousSpec, KineticMetadata, Place, PlaceType, Tokens,
    Transition, TransitionType,
};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ron error: {0}")]
    Ron(#[from] ron::Error),
    #[error("ron parse error: {0}")]
    RonParse(#[from] ron::error::SpannedError),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("inconsistent model: {0}")]
    Model(#[from] ModelInconsistencyError),
    #[error("unsupported model format `{0}`")]
    UnknownFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Ron,
    Yaml,
}

impl Format {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        let extension = path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match extension.as_str() {
            "json" => Ok(Format::Json),
            "ron" => Ok(Format::Ron),
            "yaml" | "yml" => Ok(Format::Yaml),
            other => Err(IoError::UnknownFormat(other.to_string())),
        }
    }

    pub fn to_string<T: Serialize>(self, value: &T) -> Result<String, IoError> {
        match self {
            Format::Json => Ok(serde_json::to_string_pretty(value)?),
            Format::Ron => {
                let mut pretty = PrettyConfig::default();
                pretty.new_line = "\n".into();
                Ok(ron::ser::to_string_pretty(value, pretty)?)
            }
            Format::Yaml => Ok(serde_yaml::to_string(value)?),
        }
    }

    pub fn from_str<T: DeserializeOwned>(self, s: &str) -> Result<T, IoError> {
        match self {
            Format::Json => Ok(serde_json::from_str(s)?),
            Format::Ron => Ok(ron::from_str(s)?),
            Format::Yaml => Ok(serde_yaml::from_str(s)?),
        }
    }
}

pub fn write_value<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<(), IoError> {
    let content = Format::from_path(&path)?.to_string(value)?;
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

pub fn read_value<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> Result<T, IoError> {
    let format = Format::from_path(&path)?;
    let mut file = File::open(path)?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    format.from_str(&content)
}

/// 读取并校验模型文件，格式由扩展名决定。
pub fn read_net<P: AsRef<Path>>(path: P) -> Result<Net, IoError> {
    let document: NetDocument = read_value(path)?;
    Ok(document.into_net()?)
}

pub fn write_net<P: AsRef<Path>>(path: P, net: &Net) -> Result<(), IoError> {
    write_value(path, &NetDocument::from_net(net))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub id: String,
    #[serde(default)]
    pub marking: Tokens,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<Tokens>,
    #[serde(default)]
    pub continuous: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionTypeTag {
    Immediate,
    Timed,
    Stochastic,
    Continuous,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransitionProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: String,
    pub transition_type: TransitionTypeTag,
    /// Stochastic λ, or the constant fallback of a continuous transition.
    #[serde(default = "default_rate")]
    pub rate: f64,
    #[serde(default)]
    pub earliest: f64,
    /// 缺省时取 `earliest`，即确定性延迟。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub properties: TransitionProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinetic_metadata: Option<KineticMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcRecord {
    pub source: String,
    pub target: String,
    #[serde(default = "default_weight")]
    pub weight: Tokens,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<String>,
    #[serde(default)]
    pub kind: ArcKind,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetDocument {
    #[serde(default)]
    pub places: Vec<PlaceRecord>,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,
    #[serde(default)]
    pub arcs: Vec<ArcRecord>,
}

fn default_rate() -> f64 {
    1.0
}

fn default_weight() -> Tokens {
    1.0
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl From<PlaceRecord> for Place {
    fn from(record: PlaceRecord) -> Self {
        Place {
            name: record.id,
            tokens: record.marking,
            capacity: record.capacity,
            place_type: if record.continuous {
                PlaceType::Continuous
            } else {
                PlaceType::Discrete
            },
        }
    }
}

impl From<TransitionRecord> for Transition {
    fn from(record: TransitionRecord) -> Self {
        let transition_type = match record.transition_type {
            TransitionTypeTag::Immediate => TransitionType::Immediate,
            TransitionTypeTag::Timed => TransitionType::Timed {
                earliest: record.earliest,
                latest: record.latest.unwrap_or(record.earliest),
            },
            TransitionTypeTag::Stochastic => TransitionType::Stochastic { rate: record.rate },
            TransitionTypeTag::Continuous => TransitionType::Continuous(ContinuousSpec {
                rate_function: non_empty(record.properties.rate_function),
                rate: record.rate,
                min_rate: record.properties.min_rate,
                max_rate: record.properties.max_rate,
            }),
        };
        Transition {
            name: record.id,
            transition_type,
            guard: non_empty(record.guard),
            priority: record.priority,
            kinetics: record.kinetic_metadata,
        }
    }
}

impl From<&Transition> for TransitionRecord {
    fn from(transition: &Transition) -> Self {
        let mut record = TransitionRecord {
            id: transition.name.clone(),
            transition_type: TransitionTypeTag::Immediate,
            rate: default_rate(),
            earliest: 0.0,
            latest: None,
            guard: transition.guard.clone(),
            priority: transition.priority,
            properties: TransitionProperties::default(),
            kinetic_metadata: transition.kinetics.clone(),
        };
        match &transition.transition_type {
            TransitionType::Immediate => {}
            TransitionType::Timed { earliest, latest } => {
                record.transition_type = TransitionTypeTag::Timed;
                record.earliest = *earliest;
                record.latest = Some(*latest);
            }
            TransitionType::Stochastic { rate } => {
                record.transition_type = TransitionTypeTag::Stochastic;
                record.rate = *rate;
            }
            TransitionType::Continuous(spec) => {
                record.transition_type = TransitionTypeTag::Continuous;
                record.rate = spec.rate;
                record.properties = TransitionProperties {
                    rate_function: spec.rate_function.clone(),
                    min_rate: spec.min_rate,
                    max_rate: spec.max_rate,
                };
            }
        }
        record
    }
}

impl NetDocument {
    /// 构建并校验网，弧方向由端点名字推断。
    pub fn into_net(self) -> Result<Net, ModelInconsistencyError> {
        let mut net = Net::empty();
        for place in self.places {
            net.add_place(place.into())?;
        }
        for transition in self.transitions {
            net.add_transition(transition.into())?;
        }
        for record in self.arcs {
            let input = net
                .place_id(&record.source)
                .zip(net.transition_id(&record.target));
            let output = net
                .transition_id(&record.source)
                .zip(net.place_id(&record.target));
            let (place, transition, direction) = match (input, output) {
                (Some((p, t)), _) => (p, t, ArcDirection::PlaceToTransition),
                (None, Some((t, p))) => (p, t, ArcDirection::TransitionToPlace),
                (None, None) => {
                    let source_known = net.place_id(&record.source).is_some()
                        || net.transition_id(&record.source).is_some();
                    let missing = if source_known {
                        record.target
                    } else {
                        record.source
                    };
                    return Err(ModelInconsistencyError::UnknownName(missing));
                }
            };
            net.add_arc(Arc {
                place,
                transition,
                direction,
                weight: record.weight,
                threshold: non_empty(record.threshold),
                kind: record.kind,
            })?;
        }
        net.validate()?;
        Ok(net)
    }

    pub fn from_net(net: &Net) -> Self {
        let places = net
            .places()
            .map(|(_, place)| PlaceRecord {
                id: place.name.clone(),
                marking: place.tokens,
                capacity: place.capacity,
                continuous: place.place_type == PlaceType::Continuous,
            })
            .collect();
        let transitions = net
            .transitions()
            .map(|(_, transition)| TransitionRecord::from(transition))
            .collect();
        let arcs = net
            .arcs()
            .filter_map(|(_, arc)| {
                let place = net.place(arc.place)?.name.clone();
                let transition = net.transition(arc.transition)?.name.clone();
                let (source, target) = match arc.direction {
                    ArcDirection::PlaceToTransition => (place, transition),
                    ArcDirection::TransitionToPlace => (transition, place),
                };
                Some(ArcRecord {
                    source,
                    target,
                    weight: arc.weight,
                    threshold: arc.threshold.clone(),
                    kind: arc.kind,
                })
            })
            .collect();
        NetDocument {
            places,
            transitions,
            arcs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"{
        "places": [
            {"id": "S", "marking": 10},
            {"id": "P", "marking": 0, "continuous": true}
        ],
        "transitions": [
            {
                "id": "T1",
                "transition_type": "continuous",
                "rate": 0.5,
                "guard": "S > 1",
                "properties": {"rate_function": "michaelis_menten(S, Vmax, Km)", "max_rate": 4},
                "kinetic_metadata": {
                    "formula": "Vmax*S/(Km+S)",
                    "parameters": {"Vmax": 2.0, "Km": 0.5},
                    "rate_type": "michaelis_menten",
                    "source": "manual"
                }
            },
            {"id": "T2", "transition_type": "timed", "earliest": 1.5},
            {"id": "T3", "transition_type": "stochastic", "rate": 2.0, "guard": ""}
        ],
        "arcs": [
            {"source": "S", "target": "T1"},
            {"source": "T1", "target": "P", "weight": 2},
            {"source": "P", "target": "T2", "threshold": "0.5 * S"},
            {"source": "P", "target": "T3", "kind": "inhibitor", "weight": 3}
        ]
    }"#;

    #[test]
    fn json_document_builds_a_validated_net() {
        let document: NetDocument = Format::Json.from_str(MODEL).unwrap();
        let net = document.into_net().unwrap();

        assert_eq!(net.places_len(), 2);
        let t1 = net.transition(net.transition_id("T1").unwrap()).unwrap();
        match &t1.transition_type {
            TransitionType::Continuous(spec) => {
                assert_eq!(
                    spec.rate_function.as_deref(),
                    Some("michaelis_menten(S, Vmax, Km)")
                );
                assert_eq!(spec.max_rate, Some(4.0));
                assert_eq!(spec.rate, 0.5);
            }
            other => panic!("unexpected type {other:?}"),
        }
        assert_eq!(t1.parameters().unwrap()["Km"], 0.5);

        let t2 = net.transition(net.transition_id("T2").unwrap()).unwrap();
        assert_eq!(
            t2.transition_type,
            TransitionType::Timed {
                earliest: 1.5,
                latest: 1.5
            }
        );

        let t3_id = net.transition_id("T3").unwrap();
        assert_eq!(net.transition(t3_id).unwrap().guard, None);
        let (_, inhibitor) = net.input_arcs(t3_id).next().unwrap();
        assert_eq!(inhibitor.kind, ArcKind::Inhibitor);

        let t2_id = net.transition_id("T2").unwrap();
        let (_, threshold) = net.input_arcs(t2_id).next().unwrap();
        assert_eq!(threshold.threshold.as_deref(), Some("0.5 * S"));
    }

    #[test]
    fn export_then_import_preserves_structure() {
        let net = Format::Json
            .from_str::<NetDocument>(MODEL)
            .unwrap()
            .into_net()
            .unwrap();
        let ron_text = Format::Ron.to_string(&NetDocument::from_net(&net)).unwrap();
        let again = Format::Ron
            .from_str::<NetDocument>(&ron_text)
            .unwrap()
            .into_net()
            .unwrap();
        assert_eq!(NetDocument::from_net(&net), NetDocument::from_net(&again));
    }

    #[test]
    fn arcs_with_unknown_endpoints_are_rejected() {
        let document = NetDocument {
            places: vec![PlaceRecord {
                id: "P".into(),
                marking: 1.0,
                capacity: None,
                continuous: false,
            }],
            transitions: vec![],
            arcs: vec![ArcRecord {
                source: "P".into(),
                target: "missing".into(),
                weight: 1.0,
                threshold: None,
                kind: ArcKind::Normal,
            }],
        };
        assert_eq!(
            document.into_net().unwrap_err(),
            ModelInconsistencyError::UnknownName("missing".into())
        );
    }

    #[test]
    fn invalid_timing_in_document_is_rejected() {
        let text = r#"
places: []
transitions:
  - id: T
    transition_type: timed
    earliest: 3.0
    latest: 1.0
"#;
        let document: NetDocument = Format::Yaml.from_str(text).unwrap();
        assert!(matches!(
            document.into_net(),
            Err(ModelInconsistencyError::InvertedInterval { .. })
        ));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(Format::from_path("model.JSON").unwrap(), Format::Json);
        assert_eq!(Format::from_path("a/b.yml").unwrap(), Format::Yaml);
        assert!(Format::from_path("model.xml").is_err());
    }
}
