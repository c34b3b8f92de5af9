//! 服务操作描述
//!
//! 服务操作在注册阶段通过 [`ServiceOperationBuilder`] 构建并校验，得到不可变的描述符，
//! 调用链中的拦截器直接读取其中的治理配置（负载均衡策略、缓存规则、事务标记）。

pub mod template;

pub use template::KeyTemplate;

use crate::error::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// 负载均衡（分流）策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShuntStrategy {
    #[default]
    #[serde(alias = "polling")]
    RoundRobin,
    Random,
    #[serde(alias = "hash_algorithm")]
    ConsistentHash,
    Weighted,
}

impl ShuntStrategy {
    /// 策略在选择器注册表中的名称
    pub fn name(&self) -> &'static str {
        match self {
            ShuntStrategy::RoundRobin => "round_robin",
            ShuntStrategy::Random => "random",
            ShuntStrategy::ConsistentHash => "consistent_hash",
            ShuntStrategy::Weighted => "weighted",
        }
    }
}

impl fmt::Display for ShuntStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ShuntStrategy {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "round_robin" | "polling" => Ok(ShuntStrategy::RoundRobin),
            "random" => Ok(ShuntStrategy::Random),
            "consistent_hash" | "hash_algorithm" => Ok(ShuntStrategy::ConsistentHash),
            "weighted" => Ok(ShuntStrategy::Weighted),
            other => Err(RpcError::UnknownStrategy(other.to_string())),
        }
    }
}

/// 缓存拦截方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachingMethod {
    Get,
    Update,
    Remove,
}

/// 缓存规则声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRule {
    pub method: CachingMethod,
    pub key_template: String,
    pub cache_name: String,
    /// 开启后缓存键带租户前缀
    #[serde(default = "default_true")]
    pub tenant_isolation: bool,
    /// 仅对 Remove 生效：按前缀删除
    #[serde(default)]
    pub match_by_prefix: bool,
}

impl CacheRule {
    pub fn new(
        method: CachingMethod,
        key_template: impl Into<String>,
        cache_name: impl Into<String>,
    ) -> Self {
        Self {
            method,
            key_template: key_template.into(),
            cache_name: cache_name.into(),
            tenant_isolation: true,
            match_by_prefix: false,
        }
    }

    pub fn get(key_template: impl Into<String>, cache_name: impl Into<String>) -> Self {
        Self::new(CachingMethod::Get, key_template, cache_name)
    }

    pub fn update(key_template: impl Into<String>, cache_name: impl Into<String>) -> Self {
        Self::new(CachingMethod::Update, key_template, cache_name)
    }

    pub fn remove(key_template: impl Into<String>, cache_name: impl Into<String>) -> Self {
        Self::new(CachingMethod::Remove, key_template, cache_name)
    }

    pub fn remove_by_prefix(
        key_template: impl Into<String>,
        cache_name: impl Into<String>,
    ) -> Self {
        Self {
            match_by_prefix: true,
            ..Self::remove(key_template, cache_name)
        }
    }

    pub fn without_tenant_isolation(mut self) -> Self {
        self.tenant_isolation = false;
        self
    }
}

/// 已校验的缓存规则，持有解析后的键模板
#[derive(Debug, Clone)]
pub struct CompiledCacheRule {
    rule: CacheRule,
    template: KeyTemplate,
}

impl CompiledCacheRule {
    pub fn compile(rule: CacheRule, parameters: &[String]) -> Result<Self, RpcError> {
        if rule.cache_name.trim().is_empty() {
            return Err(RpcError::invalid_template(
                &rule.key_template,
                "cache name is empty",
            ));
        }
        let template = KeyTemplate::parse(&rule.key_template, parameters)?;
        Ok(Self { rule, template })
    }

    pub fn method(&self) -> CachingMethod {
        self.rule.method
    }

    pub fn cache_name(&self) -> &str {
        &self.rule.cache_name
    }

    pub fn tenant_isolation(&self) -> bool {
        self.rule.tenant_isolation
    }

    pub fn match_by_prefix(&self) -> bool {
        self.rule.match_by_prefix
    }

    pub fn rule(&self) -> &CacheRule {
        &self.rule
    }

    /// 渲染缓存键；开启租户隔离且存在租户ID时加上租户前缀
    pub fn render_key(&self, args: &[Value], tenant_id: Option<&str>) -> String {
        let key = self.template.render(args);
        match tenant_id {
            Some(tenant) if self.rule.tenant_isolation => format!("{tenant}:{key}"),
            _ => key,
        }
    }
}

/// 服务治理配置
#[derive(Debug, Clone, Default)]
pub struct GovernanceOptions {
    pub shunt_strategy: ShuntStrategy,
    /// 自定义选择策略名称，设置后优先于 `shunt_strategy`
    pub selector: Option<String>,
    pub hash_key_parameter: Option<String>,
    pub enable_caching: bool,
    pub is_transaction: bool,
    /// TCC 确认阶段调用的操作
    pub confirm_operation: Option<String>,
    /// TCC 取消阶段调用的操作
    pub cancel_operation: Option<String>,
    pub prohibit_extranet: bool,
}

impl GovernanceOptions {
    /// 在选择器注册表中查找的策略名称
    pub fn selector_name(&self) -> &str {
        self.selector
            .as_deref()
            .unwrap_or_else(|| self.shunt_strategy.name())
    }
}

/// 可远程调用的服务操作
#[derive(Debug, Clone)]
pub struct ServiceOperation {
    id: String,
    service_id: String,
    parameters: Vec<String>,
    governance: GovernanceOptions,
    cache_rules: Vec<CompiledCacheRule>,
}

impl ServiceOperation {
    pub fn builder(
        id: impl Into<String>,
        service_id: impl Into<String>,
    ) -> ServiceOperationBuilder {
        ServiceOperationBuilder::new(id, service_id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn governance(&self) -> &GovernanceOptions {
        &self.governance
    }

    pub fn cache_rules(&self) -> &[CompiledCacheRule] {
        &self.cache_rules
    }

    pub fn is_transaction(&self) -> bool {
        self.governance.is_transaction
    }

    pub fn confirm_operation(&self) -> Option<&str> {
        self.governance.confirm_operation.as_deref()
    }

    pub fn cancel_operation(&self) -> Option<&str> {
        self.governance.cancel_operation.as_deref()
    }

    pub fn allows_extranet(&self) -> bool {
        !self.governance.prohibit_extranet
    }

    /// 一致性哈希使用的哈希键（取自声明的哈希参数）
    pub fn hash_key(&self, args: &[Value]) -> Option<String> {
        let name = self.governance.hash_key_parameter.as_ref()?;
        let index = self.parameters.iter().position(|p| p == name)?;
        match args.get(index)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// 服务操作构建器，`build` 时完成全部声明校验
#[derive(Debug, Clone)]
pub struct ServiceOperationBuilder {
    id: String,
    service_id: String,
    parameters: Vec<String>,
    governance: GovernanceOptions,
    cache_rules: Vec<CacheRule>,
}

impl ServiceOperationBuilder {
    pub fn new(id: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            service_id: service_id.into(),
            parameters: Vec::new(),
            governance: GovernanceOptions {
                enable_caching: true,
                ..Default::default()
            },
            cache_rules: Vec::new(),
        }
    }

    pub fn parameter(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(name.into());
        self
    }

    pub fn parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn strategy(mut self, strategy: ShuntStrategy) -> Self {
        self.governance.shunt_strategy = strategy;
        self
    }

    /// 使用注册表中的自定义选择策略
    pub fn selector(mut self, name: impl Into<String>) -> Self {
        self.governance.selector = Some(name.into());
        self
    }

    pub fn hash_key(mut self, parameter: impl Into<String>) -> Self {
        self.governance.hash_key_parameter = Some(parameter.into());
        self
    }

    pub fn enable_caching(mut self, enabled: bool) -> Self {
        self.governance.enable_caching = enabled;
        self
    }

    pub fn transactional(mut self, is_transaction: bool) -> Self {
        self.governance.is_transaction = is_transaction;
        self
    }

    pub fn confirm_with(mut self, operation_id: impl Into<String>) -> Self {
        self.governance.confirm_operation = Some(operation_id.into());
        self
    }

    pub fn cancel_with(mut self, operation_id: impl Into<String>) -> Self {
        self.governance.cancel_operation = Some(operation_id.into());
        self
    }

    pub fn prohibit_extranet(mut self, prohibit: bool) -> Self {
        self.governance.prohibit_extranet = prohibit;
        self
    }

    pub fn cache_rule(mut self, rule: CacheRule) -> Self {
        self.cache_rules.push(rule);
        self
    }

    pub fn build(self) -> Result<ServiceOperation, RpcError> {
        let mut seen = HashSet::new();
        for name in &self.parameters {
            if name.is_empty() {
                return Err(RpcError::invalid_operation(&self.id, "parameter name is empty"));
            }
            if !seen.insert(name.as_str()) {
                return Err(RpcError::invalid_operation(
                    &self.id,
                    format!("parameter '{name}' is declared more than once"),
                ));
            }
        }

        if let Some(hash_key) = &self.governance.hash_key_parameter {
            if !self.parameters.contains(hash_key) {
                return Err(RpcError::invalid_operation(
                    &self.id,
                    format!("hash key '{hash_key}' does not match a declared parameter"),
                ));
            }
        }

        if self.governance.selector.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(RpcError::invalid_operation(&self.id, "selector name is empty"));
        }

        let settles = self.governance.confirm_operation.is_some()
            || self.governance.cancel_operation.is_some();
        if settles && !self.governance.is_transaction {
            return Err(RpcError::invalid_operation(
                &self.id,
                "confirm/cancel operations require a transactional operation",
            ));
        }

        let cache_rules = self
            .cache_rules
            .into_iter()
            .map(|rule| CompiledCacheRule::compile(rule, &self.parameters))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ServiceOperation {
            id: self.id,
            service_id: self.service_id,
            parameters: self.parameters,
            governance: self.governance,
            cache_rules,
        })
    }
}

fn default_true() -> bool {
    true
}
