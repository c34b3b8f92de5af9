use crate::operation::{CacheRule, CachingMethod, ServiceOperation, ShuntStrategy};
use crate::types::{Endpoint, Route};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub settings: GlobalSettings,
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
    #[serde(default)]
    pub operations: HashMap<String, OperationConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GlobalSettings {
    /// 未声明策略的操作使用的负载均衡策略
    #[serde(default)]
    pub default_strategy: ShuntStrategy,
    /// 一致性哈希每个端点的虚拟节点数
    #[serde(default = "default_virtual_nodes")]
    pub consistent_hash_virtual_nodes: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// 服务的端点列表
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

/// 服务操作及其治理配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OperationConfig {
    pub service: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub strategy: Option<ShuntStrategy>,
    /// 注册表中的自定义选择策略名称
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub hash_key: Option<String>,
    #[serde(default = "default_true")]
    pub enable_caching: bool,
    #[serde(default)]
    pub transaction: bool,
    /// TCC 确认阶段调用的操作ID
    #[serde(default)]
    pub confirm: Option<String>,
    /// TCC 取消阶段调用的操作ID
    #[serde(default)]
    pub cancel: Option<String>,
    #[serde(default)]
    pub prohibit_extranet: bool,
    #[serde(default)]
    pub cache_rules: Vec<CacheRule>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            default_strategy: ShuntStrategy::default(),
            consistent_hash_virtual_nodes: default_virtual_nodes(),
            cache_ttl_seconds: default_cache_ttl(),
            cache_max_entries: default_cache_max_entries(),
            log_level: default_log_level(),
        }
    }
}

fn default_virtual_nodes() -> usize {
    160
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        self.validate_settings()?;

        for (service_id, service) in &self.services {
            self.validate_service_config(service_id, service)?;
        }

        for (operation_id, operation) in &self.operations {
            self.validate_operation_config(operation_id, operation)?;
        }

        Ok(())
    }

    fn validate_settings(&self) -> Result<()> {
        if self.settings.consistent_hash_virtual_nodes == 0 {
            anyhow::bail!("settings.consistent_hash_virtual_nodes cannot be 0");
        }

        if self.settings.cache_ttl_seconds == 0 {
            anyhow::bail!("settings.cache_ttl_seconds cannot be 0");
        }

        if self.settings.cache_max_entries == 0 {
            anyhow::bail!("settings.cache_max_entries cannot be 0");
        }

        Ok(())
    }

    fn validate_service_config(&self, service_id: &str, service: &ServiceConfig) -> Result<()> {
        if service_id.trim().is_empty() {
            anyhow::bail!("Service id cannot be empty");
        }

        let mut seen = std::collections::HashSet::new();
        for endpoint in &service.endpoints {
            if endpoint.host.trim().is_empty() {
                anyhow::bail!("Service '{}' has an endpoint with empty host", service_id);
            }

            if endpoint.port == 0 {
                anyhow::bail!(
                    "Service '{}' has endpoint '{}' with invalid port 0",
                    service_id,
                    endpoint.host
                );
            }

            if !endpoint.weight.is_finite() || endpoint.weight < 0.0 {
                anyhow::bail!(
                    "Service '{}' has endpoint '{}' with invalid weight: {} (must be >= 0)",
                    service_id,
                    endpoint.address(),
                    endpoint.weight
                );
            }

            if !seen.insert(endpoint.descriptor()) {
                anyhow::bail!(
                    "Service '{}' declares endpoint '{}' more than once",
                    service_id,
                    endpoint.descriptor()
                );
            }
        }

        Ok(())
    }

    fn validate_operation_config(
        &self,
        operation_id: &str,
        operation: &OperationConfig,
    ) -> Result<()> {
        if operation.service.is_empty() {
            anyhow::bail!("Operation '{}' has empty service", operation_id);
        }

        if !self.services.contains_key(&operation.service) {
            anyhow::bail!(
                "Operation '{}' references unknown service '{}'",
                operation_id,
                operation.service
            );
        }

        let get_rules = operation
            .cache_rules
            .iter()
            .filter(|r| r.method == CachingMethod::Get)
            .count();
        if get_rules > 1 {
            tracing::warn!(
                "Operation '{}' declares {} get cache rules, only the first one is used",
                operation_id,
                get_rules
            );
        }

        for (phase, target) in [("confirm", &operation.confirm), ("cancel", &operation.cancel)] {
            if let Some(target) = target {
                if !self.operations.contains_key(target) {
                    anyhow::bail!(
                        "Operation '{}' declares unknown {} operation '{}'",
                        operation_id,
                        phase,
                        target
                    );
                }
            }
        }

        // 模板、哈希参数等规则交给构建器校验
        self.build_operation(operation_id, operation)?;

        Ok(())
    }

    fn build_operation(
        &self,
        operation_id: &str,
        operation: &OperationConfig,
    ) -> Result<ServiceOperation> {
        let mut builder = ServiceOperation::builder(operation_id, &operation.service)
            .parameters(operation.parameters.iter().cloned())
            .strategy(operation.strategy.unwrap_or(self.settings.default_strategy))
            .enable_caching(operation.enable_caching)
            .transactional(operation.transaction)
            .prohibit_extranet(operation.prohibit_extranet);

        if let Some(selector) = &operation.selector {
            builder = builder.selector(selector);
        }

        if let Some(hash_key) = &operation.hash_key {
            builder = builder.hash_key(hash_key);
        }

        if let Some(confirm) = &operation.confirm {
            builder = builder.confirm_with(confirm);
        }

        if let Some(cancel) = &operation.cancel {
            builder = builder.cancel_with(cancel);
        }

        for rule in &operation.cache_rules {
            builder = builder.cache_rule(rule.clone());
        }

        builder
            .build()
            .map_err(|e| anyhow::anyhow!("Operation '{}' is invalid: {}", operation_id, e))
    }

    /// 根据服务配置生成路由表
    pub fn build_routes(&self) -> Vec<Route> {
        self.services
            .iter()
            .map(|(service_id, service)| Route::new(service_id, service.endpoints.clone()))
            .collect()
    }

    /// 根据操作配置生成服务操作描述
    pub fn build_operations(&self) -> Result<Vec<ServiceOperation>> {
        self.operations
            .iter()
            .map(|(operation_id, operation)| self.build_operation(operation_id, operation))
            .collect()
    }
}
