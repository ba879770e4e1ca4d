//! 熔断器注册表
//!
//! 进程启动时创建一次并注入各组件；按名称复用熔断器，状态在进程生命周期内保持，
//! 因此并发会话调用同一推理服务时看到的是同一个开/闭状态。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::BreakersSection;
use crate::resilience::{BreakerConfig, BreakerStats, CircuitBreaker};

#[derive(Debug, Default)]
pub struct BreakerRegistry {
    defaults: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(defaults: BreakerConfig) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(section: &BreakersSection) -> Self {
        let mut registry = Self::new(section.default.to_breaker_config());
        for (name, cfg) in &section.overrides {
            registry = registry.with_override(name.clone(), cfg.to_breaker_config());
        }
        registry
    }

    /// 为指定名称的熔断器设置专用配置（须在首次 get_or_create 之前）
    pub fn with_override(mut self, name: impl Into<String>, config: BreakerConfig) -> Self {
        self.overrides.insert(name.into(), config);
        self
    }

    /// 按名称获取熔断器，不存在时用（覆盖或默认）配置创建
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self
            .breakers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
        {
            return b.clone();
        }
        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self
                    .overrides
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| self.defaults.clone());
                tracing::debug!(breaker = name, "registering circuit breaker");
                Arc::new(CircuitBreaker::new(name, config))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// 所有熔断器的快照，按名称排序
    pub fn stats(&self) -> Vec<BreakerStats> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut stats: Vec<BreakerStats> = breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_same_name_same_breaker() {
        let registry = BreakerRegistry::default();
        let a = registry.get_or_create("provider");
        let b = registry.get_or_create("provider");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn test_override_applies_by_name() {
        let special = BreakerConfig {
            timeout: Duration::from_millis(5),
            ..BreakerConfig::default()
        };
        let registry = BreakerRegistry::default().with_override("webhook", special.clone());
        assert_eq!(registry.get_or_create("webhook").config(), &special);
        assert_eq!(
            registry.get_or_create("provider").config(),
            &BreakerConfig::default()
        );
        let names: Vec<String> = registry.stats().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["provider".to_string(), "webhook".to_string()]);
    }
}
