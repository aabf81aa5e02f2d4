//! # 混合 Petri 网结构
//!
//! 设库所集合 `P` 与迁移集合 `T`。每条弧连接一个库所与一个迁移，携带固定权重
//! `w ≥ 0` 或阈值表达式（存在时覆盖 `w`）。标识 `M ∈ ℝ≥0^{|P|}`：离散库所持有整数令牌，
//! 连续库所持有实数量。
//!
//! 迁移按时间语义分为四类：
//! * `Immediate`：可激发即发射；
//! * `Timed`：在持续可激发时长落入 `[earliest, latest]` 时发射；
//! * `Stochastic`：延迟服从参数为 `λ` 的指数分布，每次重新可激发时重新采样；
//! * `Continuous`：每步按速率函数移动 `rate × dt` 的量。
//!
//! 本模块只描述结构与校验；发射语义见 [`crate::engine`]。
//!
//! ## 示例
//!
//! ```rust
//! use hybrid_pn::net::*;
//!
//! let mut net = Net::empty();
//! let p1 = net.add_place(Place::new("P1", 5.0)).unwrap();
//! let p2 = net.add_place(Place::new("P2", 0.0)).unwrap();
//! let t1 = net.add_transition(Transition::immediate("T1")).unwrap();
//!
//! net.add_arc(Arc::input(p1, t1, 1.0)).unwrap();
//! net.add_arc(Arc::output(p2, t1, 1.0)).unwrap();
//!
//! assert!(net.validate().is_ok());
//! assert_eq!(net.initial_marking().tokens(p1), 5.0);
//! ```

pub mod core;
pub mod ids;
pub mod incidence;
pub mod index_vec;
pub mod io;
pub mod structure;

pub use core::{DiagnosticReport, ModelInconsistencyError, Net, RESERVED_NAMES, is_reserved};
pub use ids::{ArcId, ElementRef, PlaceId, TransitionId};
pub use incidence::Incidence;
pub use index_vec::{Idx, IndexVec};
pub use io::{IoError, NetDocument};
pub use structure::{
    Arc, ArcDirection, ArcKind, ContinuousSpec, KineticMetadata, Marking, Place, PlaceType, Tokens,
    Transition, TransitionType,
};
