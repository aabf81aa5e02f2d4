//! # 混合发射引擎
//!
//! 在统一的步进模型中协调四种时间语义：
//!
//! * [`enablement`]：结构与守卫可激发性，以及每个迁移最近一次变为可激发的时刻；
//! * [`behavior`]：每种迁移类型的策略对象，回答“现在能否发射”和“移动多少”；
//! * [`conflict`]：对就绪候选集排序并贪心接纳；
//! * [`flow`]：连续流的比例缩放与容量限制；
//! * [`scheduler`]：步进循环与模型编辑入口；
//! * [`ensemble`]：多种子并行重复实验。
//!
//! ```rust
//! use hybrid_pn::config::SimulationConfig;
//! use hybrid_pn::engine::Simulation;
//! use hybrid_pn::net::{Arc, Net, Place, Transition};
//!
//! let mut net = Net::empty();
//! let p1 = net.add_place(Place::new("P1", 5.0)).unwrap();
//! let p2 = net.add_place(Place::new("P2", 0.0)).unwrap();
//! let t1 = net.add_transition(Transition::immediate("T1")).unwrap();
//! net.add_arc(Arc::input(p1, t1, 1.0)).unwrap();
//! net.add_arc(Arc::output(p2, t1, 1.0)).unwrap();
//!
//! let mut sim = Simulation::new(net, SimulationConfig::default()).unwrap();
//! let outcome = sim.step();
//! assert_eq!(outcome.fired, vec![t1]);
//! assert_eq!(sim.tokens("P1"), Some(4.0));
//! assert_eq!(sim.tokens("P2"), Some(1.0));
//! ```

pub mod behavior;
pub mod cache;
pub mod conflict;
pub mod enablement;
pub mod ensemble;
pub mod flow;
pub mod scheduler;
pub mod scope;

/// 就绪判定中所有时间比较使用的容差。
pub const TIME_EPSILON: f64 = 1e-9;

pub use behavior::{Readiness, TransitionBehavior, behavior_for};
pub use conflict::{Candidate, ConflictPolicy, Denial, Resolution};
pub use enablement::{EnablementChange, EnablementRecord, EnablementTracker};
pub use ensemble::{mean_final_marking, run_replicates};
pub use flow::ContinuousFlow;
pub use scheduler::{
    CancelToken, DeadlockSignal, FiringEvent, RunSummary, Simulation, SimulationError,
    SimulationStatus, StepOutcome, StepWarning, TransitionFault,
};
pub use scope::Scope;
