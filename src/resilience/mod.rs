//! 弹性层：命名熔断器与注册表，保护所有对推理服务及其它不稳定依赖的外呼

pub mod breaker;
pub mod registry;

pub use breaker::{BreakerConfig, BreakerError, BreakerState, BreakerStats, CircuitBreaker};
pub use registry::BreakerRegistry;
