//! Live-page selectors
//!
//! A browser response has no body to parse offline: the page lives in the
//! browser. Queries are compiled to a script and run there.
//!
//! Beyond plain element selection, both dialects can pull out text and
//! attributes:
//!
//! | CSS                   | XPath             | yields                      |
//! |-----------------------|-------------------|-----------------------------|
//! | `h2::text`            | `//h2/text()`     | direct text nodes           |
//! | `h2 ::text`           | `//h2//text()`    | all descendant text nodes   |
//! | `a::attr(href)`       | `//a/@href`       | attribute values            |
//! | `h2`                  | `//h2`            | element `innerText`         |

use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Css,
    XPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extract {
    /// Rendered text of each matched element
    Element,
    Text { recurse: bool },
    Attr(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub dialect: Dialect,
    /// Expression handed to the browser, extraction suffix removed
    pub expr: String,
    pub extract: Extract,
}

fn is_attr_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

impl Query {
    pub fn css(expr: &str) -> Self {
        if let Some(base) = expr.strip_suffix("::text") {
            // "h2 ::text" walks descendants, "h2::text" only children
            let recurse = base.ends_with(' ');
            return Self {
                dialect: Dialect::Css,
                expr: base.trim_end().to_string(),
                extract: Extract::Text { recurse },
            };
        }

        if let Some(open) = expr.rfind("::attr(") {
            if let Some(name) = expr[open + "::attr(".len()..].strip_suffix(')') {
                if is_attr_name(name) {
                    return Self {
                        dialect: Dialect::Css,
                        expr: expr[..open].to_string(),
                        extract: Extract::Attr(name.to_string()),
                    };
                }
            }
        }

        Self {
            dialect: Dialect::Css,
            expr: expr.to_string(),
            extract: Extract::Element,
        }
    }

    pub fn xpath(expr: &str) -> Self {
        let element = || Self {
            dialect: Dialect::XPath,
            expr: expr.to_string(),
            extract: Extract::Element,
        };

        let Some(slash) = expr.rfind('/') else {
            return element();
        };
        let (base, step) = (&expr[..slash], &expr[slash + 1..]);

        if let Some(name) = step.strip_prefix('@') {
            if is_attr_name(name) && !base.is_empty() {
                return Self {
                    dialect: Dialect::XPath,
                    expr: base.to_string(),
                    extract: Extract::Attr(name.to_string()),
                };
            }
        } else if step == "text()" {
            // "//div//text()" leaves "//div/" once "/text()" is cut
            let (base, recurse) = match base.strip_suffix('/') {
                Some(base) => (base, true),
                None => (base, false),
            };
            if !base.is_empty() {
                return Self {
                    dialect: Dialect::XPath,
                    expr: base.to_string(),
                    extract: Extract::Text { recurse },
                };
            }
        }

        element()
    }

    /// One JS expression evaluating to an array of strings
    pub fn script(&self) -> String {
        // serde_json string literals are valid JS string literals
        let literal = Value::String(self.expr.clone()).to_string();

        let nodes = match self.dialect {
            Dialect::Css => format!("Array.from(document.querySelectorAll({}))", literal),
            Dialect::XPath => format!(
                "(() => {{ const r = document.evaluate({}, document, null, \
                 XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); const a = []; \
                 for (let i = 0; i < r.snapshotLength; i++) a.push(r.snapshotItem(i)); \
                 return a; }})()",
                literal
            ),
        };

        let each = match &self.extract {
            Extract::Element => "out.push(n.innerText ?? n.textContent);".to_string(),
            Extract::Text { recurse } => format!("out.push(...texts(n, {}));", recurse),
            Extract::Attr(name) => format!(
                "const v = n.getAttribute ? n.getAttribute({}) : null; if (v !== null) out.push(v);",
                Value::String(name.clone())
            ),
        };

        format!(
            "(() => {{ \
             const texts = (node, recurse) => {{ const r = []; \
             for (const c of node.childNodes) {{ \
             if (c.nodeType === Node.TEXT_NODE) r.push(c.textContent); \
             else if (recurse && c.nodeType === Node.ELEMENT_NODE) r.push(...texts(c, true)); }} \
             return r; }}; \
             const out = []; \
             for (const n of {}) {{ {} }} \
             return out; }})()",
            nodes, each
        )
    }
}

/// Runs queries against the page currently loaded in a session
#[derive(Clone)]
pub struct Selector {
    session: Arc<dyn Session>,
}

impl Selector {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self { session }
    }

    pub async fn css(&self, expr: &str) -> Result<Vec<String>> {
        self.select(&Query::css(expr)).await
    }

    pub async fn xpath(&self, expr: &str) -> Result<Vec<String>> {
        self.select(&Query::xpath(expr)).await
    }

    pub async fn select(&self, query: &Query) -> Result<Vec<String>> {
        let value = self.session.evaluate(&query.script()).await?;
        Ok(into_list(value)
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect())
    }

    pub async fn extract_first(&self, query: &Query) -> Result<Option<String>> {
        Ok(self.select(query).await?.into_iter().next())
    }

    /// Arbitrary script; a non-array result becomes a single element
    pub async fn select_script(&self, script: &str) -> Result<Vec<Value>> {
        Ok(into_list(self.session.evaluate(script).await?))
    }
}

fn into_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(values) => values,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionFactory;
    use crate::testing::ScriptedFactory;
    use serde_json::json;

    #[test]
    fn test_css_text() {
        let q = Query::css("h2.heading::text");
        assert_eq!(q.expr, "h2.heading");
        assert_eq!(q.extract, Extract::Text { recurse: false });

        let q = Query::css("h2.heading ::text");
        assert_eq!(q.expr, "h2.heading");
        assert_eq!(q.extract, Extract::Text { recurse: true });
    }

    #[test]
    fn test_css_attr() {
        let q = Query::css("a.clicky::attr(href)");
        assert_eq!(q.expr, "a.clicky");
        assert_eq!(q.extract, Extract::Attr("href".to_string()));

        let q = Query::css("div::attr(data-id)");
        assert_eq!(q.extract, Extract::Attr("data-id".to_string()));

        // Not an attribute name, leave the selector alone
        let q = Query::css("div::attr(a b)");
        assert_eq!(q.expr, "div::attr(a b)");
        assert_eq!(q.extract, Extract::Element);
    }

    #[test]
    fn test_xpath_endings() {
        let q = Query::xpath("//div[@id='main']/p/text()");
        assert_eq!(q.expr, "//div[@id='main']/p");
        assert_eq!(q.extract, Extract::Text { recurse: false });

        let q = Query::xpath("/html/body//text()");
        assert_eq!(q.expr, "/html/body");
        assert_eq!(q.extract, Extract::Text { recurse: true });

        let q = Query::xpath("//a/@href");
        assert_eq!(q.expr, "//a");
        assert_eq!(q.extract, Extract::Attr("href".to_string()));
    }

    #[test]
    fn test_xpath_plain_elements() {
        for expr in ["//ul/li", "//a[@href]", "li", "count(//a)"] {
            let q = Query::xpath(expr);
            assert_eq!(q.expr, expr);
            assert_eq!(q.extract, Extract::Element);
        }
    }

    #[test]
    fn test_script_quotes_expression() {
        let script = Query::css(r#"a[title="it's"]::attr(href)"#).script();
        assert!(script.contains(r#"document.querySelectorAll("a[title=\"it's\"]")"#));
        assert!(script.contains(r#"getAttribute("href")"#));

        let script = Query::xpath("//p//text()").script();
        assert!(script.contains("XPathResult.ORDERED_NODE_SNAPSHOT_TYPE"));
        assert!(script.contains("texts(n, true)"));
    }

    #[tokio::test]
    async fn test_selector_runs_in_session() {
        let factory = ScriptedFactory::new();
        factory.evaluate_returns(json!(["Rust", 2024, null]));
        let selector = Selector::new(factory.launch().await.unwrap());

        let values = selector.css("h1::text").await.unwrap();
        assert_eq!(values, vec!["Rust", "2024", "null"]);
        assert_eq!(factory.evaluated(), vec![Query::css("h1::text").script()]);

        let first = selector.extract_first(&Query::xpath("//h1")).await.unwrap();
        assert_eq!(first.as_deref(), Some("Rust"));
    }

    #[tokio::test]
    async fn test_select_script_wraps_scalars() {
        let factory = ScriptedFactory::new();
        let selector = Selector::new(factory.launch().await.unwrap());

        factory.evaluate_returns(json!("title"));
        assert_eq!(selector.select_script("document.title").await.unwrap(), vec![json!("title")]);

        factory.evaluate_returns(Value::Null);
        assert!(selector.select_script("undefined").await.unwrap().is_empty());
    }
}
