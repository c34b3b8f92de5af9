use crate::error::RpcError;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Parameter { index: usize, path: Vec<String> },
}

/// 缓存键模板
///
/// 支持的占位符：
/// - `{name}`：按声明的参数名引用
/// - `{0}`：按参数位置引用
/// - `{name.field}`：引用对象参数中的字段
///
/// 模板在注册时解析并校验，调用时渲染不会失败。
#[derive(Debug, Clone, PartialEq)]
pub struct KeyTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl KeyTemplate {
    /// 解析模板并根据声明的参数校验占位符
    pub fn parse(template: &str, parameters: &[String]) -> Result<Self, RpcError> {
        if template.trim().is_empty() {
            return Err(RpcError::invalid_template(template, "template is empty"));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut placeholder = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        match inner {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(RpcError::invalid_template(
                                    template,
                                    "nested '{' inside placeholder",
                                ));
                            }
                            _ => placeholder.push(inner),
                        }
                    }
                    if !closed {
                        return Err(RpcError::invalid_template(template, "unclosed placeholder"));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Self::resolve_placeholder(template, &placeholder, parameters)?);
                }
                '}' => {
                    return Err(RpcError::invalid_template(
                        template,
                        "'}' without matching '{'",
                    ));
                }
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    fn resolve_placeholder(
        template: &str,
        placeholder: &str,
        parameters: &[String],
    ) -> Result<Segment, RpcError> {
        let placeholder = placeholder.trim();
        if placeholder.is_empty() {
            return Err(RpcError::invalid_template(template, "empty placeholder '{}'"));
        }

        let mut parts = placeholder.split('.');
        let root = parts.next().unwrap_or_default();
        let path: Vec<String> = parts.map(str::to_string).collect();
        if path.iter().any(|p| p.is_empty()) {
            return Err(RpcError::invalid_template(
                template,
                format!("placeholder '{{{placeholder}}}' has an empty field path"),
            ));
        }

        let index = if root.chars().all(|c| c.is_ascii_digit()) {
            let index: usize = root.parse().map_err(|_| {
                RpcError::invalid_template(template, format!("invalid parameter index '{root}'"))
            })?;
            if index >= parameters.len() {
                return Err(RpcError::invalid_template(
                    template,
                    format!(
                        "parameter index {index} is out of range ({} declared)",
                        parameters.len()
                    ),
                ));
            }
            index
        } else {
            parameters.iter().position(|p| p == root).ok_or_else(|| {
                RpcError::invalid_template(
                    template,
                    format!("placeholder '{{{placeholder}}}' does not match a declared parameter"),
                )
            })?
        };

        Ok(Segment::Parameter { index, path })
    }

    /// 使用实际调用参数渲染缓存键
    pub fn render(&self, args: &[Value]) -> String {
        let mut key = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => key.push_str(text),
                Segment::Parameter { index, path } => {
                    let value = path.iter().fold(args.get(*index), |current, field| {
                        current.and_then(|v| lookup_field(v, field))
                    });
                    key.push_str(&render_value(value));
                }
            }
        }
        key
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// 模板是否包含参数占位符
    pub fn is_parameterized(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Parameter { .. }))
    }
}

fn lookup_field<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(field),
        Value::Array(items) => field.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn render_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_render_named_and_positional() {
        let template = KeyTemplate::parse("user:{id}:{1}", &params(&["id", "lang"])).unwrap();
        let key = template.render(&[json!(42), json!("en")]);
        assert_eq!(key, "user:42:en");
        assert!(template.is_parameterized());
    }

    #[test]
    fn test_render_field_path() {
        let template =
            KeyTemplate::parse("order:{input.customer.id}", &params(&["input"])).unwrap();
        let key = template.render(&[json!({"customer": {"id": "c-7"}})]);
        assert_eq!(key, "order:c-7");

        // 调用时缺失的字段渲染为 null
        let key = template.render(&[json!({"customer": {}})]);
        assert_eq!(key, "order:null");
    }

    #[test]
    fn test_render_non_string_values_as_json() {
        let template = KeyTemplate::parse("q:{filter}", &params(&["filter"])).unwrap();
        let key = template.render(&[json!({"a": 1})]);
        assert_eq!(key, r#"q:{"a":1}"#);
    }

    #[test]
    fn test_literal_template() {
        let template = KeyTemplate::parse("all-users", &params(&[])).unwrap();
        assert!(!template.is_parameterized());
        assert_eq!(template.render(&[]), "all-users");
    }

    #[test]
    fn test_invalid_templates() {
        let declared = params(&["id"]);
        let rejected = [
            "",
            "user:{name}",
            "user:{1}",
            "user:{id",
            "user:id}",
            "user:{}",
            "user:{id.}",
            "{a{b}}",
        ];
        for bad in rejected {
            let err = KeyTemplate::parse(bad, &declared).unwrap_err();
            assert!(
                matches!(err, RpcError::InvalidCacheTemplate { .. }),
                "template '{bad}' should be rejected"
            );
        }
    }
}
