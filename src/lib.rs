//! 混合 Petri 网发射引擎。
//!
//! * [`net`]：网结构、校验、诊断与序列化；
//! * [`expr`]：守卫、速率函数与弧阈值使用的受限表达式语言；
//! * [`engine`]：可激发跟踪、四种时间语义、冲突消解与步进调度；
//! * [`notify`]：模型与仿真事件的观察者注册表；
//! * [`config`] / [`options`]：仿真配置与命令行选项。
#![warn(non_snake_case)]

pub mod config;
pub mod engine;
pub mod expr;
pub mod net;
pub mod notify;
pub mod options;
