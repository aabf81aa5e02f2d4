use indexmap::IndexMap;

use crate::expr::{Bindings, Value};
use crate::net::{Marking, Net};

/// Variable namespace seen by a transition's guard, rate function and arc thresholds.
///
/// Resolution order: `t`, the transition's kinetic parameters, then place markings by name.
/// `pi` and `e` are supplied by the evaluator when nothing here matches.
pub struct Scope<'a> {
    net: &'a Net,
    marking: &'a Marking,
    time: f64,
    parameters: Option<&'a IndexMap<String, f64>>,
}

impl<'a> Scope<'a> {
    pub fn new(
        net: &'a Net,
        marking: &'a Marking,
        time: f64,
        parameters: Option<&'a IndexMap<String, f64>>,
    ) -> Self {
        Self {
            net,
            marking,
            time,
            parameters,
        }
    }
}

impl Bindings for Scope<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        if name == "t" {
            return Some(Value::Number(self.time));
        }
        if let Some(value) = self.parameters.and_then(|params| params.get(name)) {
            return Some(Value::Number(*value));
        }
        self.net
            .place_id(name)
            .map(|place| Value::Number(self.marking.tokens(place)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::CompiledExpr;
    use crate::net::Place;

    #[test]
    fn parameters_shadow_places_and_time_is_bound() {
        let mut net = Net::empty();
        net.add_place(Place::new("S", 3.0)).unwrap();
        net.add_place(Place::new("k", 100.0)).unwrap();
        let marking = net.initial_marking();
        let mut params = IndexMap::new();
        params.insert("k".to_string(), 0.5);

        let scope = Scope::new(&net, &marking, 2.0, Some(&params));
        let expr = CompiledExpr::compile("k * S + t").unwrap();
        assert_eq!(expr.evaluate_number(&scope), Ok(3.5));

        let bare = Scope::new(&net, &marking, 0.0, None);
        assert_eq!(expr.evaluate_number(&bare), Ok(300.0));
    }
}
