//! Environment variable resolution for task configurations.
//!
//! Variables may carry a `condition` (dropped when it evaluates false) or an
//! `expression` (evaluated into the value) written in a small expression
//! language over the tide's code reference and flow. Resolved values are
//! then substituted into `${NAME}` placeholders across the configuration.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::events::CodeReference;

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl EnvironmentVariable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expression: None,
            condition: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("The expression provided (\"{expression}\") is not valid: {message}")]
pub struct ConfigurationError {
    pub expression: String,
    pub message: String,
}

impl ConfigurationError {
    fn new(expression: &str, message: impl Into<String>) -> Self {
        Self {
            expression: expression.to_string(),
            message: message.into(),
        }
    }
}

/// Variables visible to expressions.
#[derive(Debug, Clone)]
pub struct ExpressionContext {
    root: Value,
}

impl ExpressionContext {
    pub fn new(code_reference: &CodeReference, flow_uuid: Uuid) -> Self {
        Self {
            root: serde_json::json!({
                "code_reference": {
                    "branch": code_reference.branch,
                    "sha": code_reference.sha,
                    "pull_request": code_reference.pull_request,
                },
                "flow": {
                    "uuid": flow_uuid.to_string(),
                },
            }),
        }
    }

    fn lookup(&self, path: &str) -> Option<&Value> {
        let pointer = format!("/{}", path.replace('.', "/"));
        self.root.pointer(&pointer)
    }
}

/// Evaluate conditions and expressions, returning the variables that apply.
pub fn resolve_variables(
    variables: &[EnvironmentVariable],
    context: &ExpressionContext,
) -> Result<Vec<EnvironmentVariable>, ConfigurationError> {
    let mut resolved = Vec::with_capacity(variables.len());

    for variable in variables {
        if let Some(condition) = &variable.condition {
            if !is_truthy(&evaluate(condition, context)?) {
                continue;
            }
        }

        let value = match &variable.expression {
            Some(expression) => value_to_string(&evaluate(expression, context)?),
            None => variable.value.clone(),
        };

        resolved.push(EnvironmentVariable::new(variable.name.clone(), value));
    }

    Ok(resolved)
}

/// Replace `${NAME}` placeholders in every string of `value`, recursively.
pub fn replace_values(value: &mut Value, mapping: &BTreeMap<String, String>) {
    match value {
        Value::String(s) => {
            let replaced = replace_variables(s, mapping);
            *s = replaced;
        }
        Value::Array(items) => {
            for item in items {
                replace_values(item, mapping);
            }
        }
        Value::Object(entries) => {
            for (_, item) in entries.iter_mut() {
                replace_values(item, mapping);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Replace the `${NAME}` placeholders of a single string. Unknown names are left as-is.
pub fn replace_variables(value: &str, mapping: &BTreeMap<String, String>) -> String {
    PLACEHOLDER_REGEX
        .replace_all(value, |caps: &Captures| match mapping.get(&caps[1]) {
            Some(resolved) => resolved.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Evaluate an expression against the context.
pub fn evaluate(expression: &str, context: &ExpressionContext) -> Result<Value, ConfigurationError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        expression,
        tokens: &tokens,
        position: 0,
        context,
    };

    let value = parser.or()?;
    if parser.position != tokens.len() {
        return Err(ConfigurationError::new(
            expression,
            format!("unexpected token at position {}", parser.position),
        ));
    }

    Ok(value)
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(entries) => !entries.is_empty(),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Expression parsing ──

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(Value),
    Path(String),
    Eq,
    Ne,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn tokenize(expression: &str) -> Result<Vec<Token>, ConfigurationError> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' | '!' | '&' | '|' => {
                let next = chars.get(i + 1).copied();
                let token = match (c, next) {
                    ('=', Some('=')) => Token::Eq,
                    ('!', Some('=')) => Token::Ne,
                    ('&', Some('&')) => Token::And,
                    ('|', Some('|')) => Token::Or,
                    ('!', _) => {
                        tokens.push(Token::Not);
                        i += 1;
                        continue;
                    }
                    _ => {
                        return Err(ConfigurationError::new(
                            expression,
                            format!("unexpected character \"{c}\""),
                        ))
                    }
                };
                tokens.push(token);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == quote)
                    .map(|offset| start + offset)
                    .ok_or_else(|| ConfigurationError::new(expression, "unterminated string"))?;
                let literal: String = chars[start..end].iter().collect();
                tokens.push(Token::Literal(Value::String(literal)));
                i = end + 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let digits: String = chars[start..i].iter().collect();
                let number: u64 = digits
                    .parse()
                    .map_err(|_| ConfigurationError::new(expression, "invalid number"))?;
                tokens.push(Token::Literal(Value::from(number)));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "null" => Token::Literal(Value::Null),
                    _ => Token::Path(word),
                });
            }
            other => {
                return Err(ConfigurationError::new(
                    expression,
                    format!("unexpected character \"{other}\""),
                ))
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    expression: &'a str,
    tokens: &'a [Token],
    position: usize,
    context: &'a ExpressionContext,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.position);
        self.position += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> ConfigurationError {
        ConfigurationError::new(self.expression, message)
    }

    fn or(&mut self) -> Result<Value, ConfigurationError> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.position += 1;
            let right = self.and()?;
            left = Value::Bool(is_truthy(&left) || is_truthy(&right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Value, ConfigurationError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.position += 1;
            let right = self.unary()?;
            left = Value::Bool(is_truthy(&left) && is_truthy(&right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Value, ConfigurationError> {
        if self.peek() == Some(&Token::Not) {
            self.position += 1;
            let value = self.unary()?;
            return Ok(Value::Bool(!is_truthy(&value)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Value, ConfigurationError> {
        let left = self.primary()?;
        match self.peek() {
            Some(Token::Eq) => {
                self.position += 1;
                let right = self.primary()?;
                Ok(Value::Bool(left == right))
            }
            Some(Token::Ne) => {
                self.position += 1;
                let right = self.primary()?;
                Ok(Value::Bool(left != right))
            }
            _ => Ok(left),
        }
    }

    fn primary(&mut self) -> Result<Value, ConfigurationError> {
        match self.advance().cloned() {
            Some(Token::Literal(value)) => Ok(value),
            Some(Token::Path(path)) => self
                .context
                .lookup(&path)
                .cloned()
                .ok_or_else(|| self.error(format!("variable \"{path}\" is not defined"))),
            Some(Token::LParen) => {
                let value = self.or()?;
                if matches!(self.advance(), Some(Token::RParen)) {
                    Ok(value)
                } else {
                    Err(self.error("missing closing parenthesis"))
                }
            }
            Some(token) => Err(self.error(format!("unexpected token {token:?}"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CodeRepository;

    fn context(branch: &str) -> ExpressionContext {
        let code_reference = CodeReference {
            repository: CodeRepository::new("acme/api"),
            branch: branch.to_string(),
            sha: "abc123".to_string(),
            pull_request: None,
        };
        ExpressionContext::new(&code_reference, Uuid::nil())
    }

    #[test]
    fn test_replace_known_and_unknown_placeholders() {
        let mapping = BTreeMap::from([(
            "SERVICE_WEB_PUBLIC_ENDPOINT".to_string(),
            "1.2.3.4".to_string(),
        )]);

        assert_eq!(
            replace_variables("http://${SERVICE_WEB_PUBLIC_ENDPOINT}/", &mapping),
            "http://1.2.3.4/"
        );
        assert_eq!(replace_variables("${unknown}", &mapping), "${unknown}");
    }

    #[test]
    fn test_replace_values_walks_nested_structures() {
        let mapping = BTreeMap::from([("HOST".to_string(), "db".to_string())]);
        let mut value = serde_json::json!({
            "commands": ["ping ${HOST}"],
            "nested": {"url": "postgres://${HOST}:5432", "port": 5432},
        });

        replace_values(&mut value, &mapping);

        assert_eq!(value["commands"][0], "ping db");
        assert_eq!(value["nested"]["url"], "postgres://db:5432");
        assert_eq!(value["nested"]["port"], 5432);
    }

    #[test]
    fn test_condition_drops_variable() {
        let variables = vec![
            EnvironmentVariable {
                name: "ENV".to_string(),
                value: "production".to_string(),
                expression: None,
                condition: Some("code_reference.branch == 'main'".to_string()),
            },
            EnvironmentVariable::new("ALWAYS", "yes"),
        ];

        let on_main = resolve_variables(&variables, &context("main")).unwrap();
        assert_eq!(on_main.len(), 2);

        let on_feature = resolve_variables(&variables, &context("feature/x")).unwrap();
        assert_eq!(on_feature, vec![EnvironmentVariable::new("ALWAYS", "yes")]);
    }

    #[test]
    fn test_expression_resolves_value() {
        let variables = vec![EnvironmentVariable {
            name: "COMMIT".to_string(),
            value: String::new(),
            expression: Some("code_reference.sha".to_string()),
            condition: None,
        }];

        let resolved = resolve_variables(&variables, &context("main")).unwrap();
        assert_eq!(resolved[0].value, "abc123");
    }

    #[test]
    fn test_boolean_operators() {
        let ctx = context("develop");
        let value = evaluate(
            "not (code_reference.branch == 'main') and code_reference.pull_request == null",
            &ctx,
        )
        .unwrap();
        assert_eq!(value, Value::Bool(true));

        let value = evaluate("code_reference.branch == 'main' || flow.uuid != ''", &ctx).unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn test_malformed_expression_names_the_expression() {
        let err = evaluate("code_reference.branch == 'main", &context("main")).unwrap_err();
        assert_eq!(err.expression, "code_reference.branch == 'main");
        assert!(err.to_string().contains("unterminated string"));

        let err = evaluate("missing.variable", &context("main")).unwrap_err();
        assert!(err.message.contains("missing.variable"));

        assert!(evaluate("code_reference.branch ==", &context("main")).is_err());
    }
}
