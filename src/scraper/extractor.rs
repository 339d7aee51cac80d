use serde::Serialize;
use serde_json::{json, Value};

/// In-page JavaScript shipped with the crate.
///
/// Each source is a single function expression taking one JSON argument;
/// call sites only serialize arguments, they never build code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionScript {
    pub name: &'static str,
    pub version: u32,
    pub source: &'static str,
}

/// Page state used for challenge detection
pub static PROBE_SCRIPT: ExtractionScript = ExtractionScript {
    name: "probe",
    version: 1,
    source: include_str!("scripts/probe.js"),
};

/// Whether article markup has rendered yet
pub static READINESS_SCRIPT: ExtractionScript = ExtractionScript {
    name: "readiness",
    version: 1,
    source: include_str!("scripts/readiness.js"),
};

/// Raw meta/icon/title data for previews
pub static PREVIEW_SCRIPT: ExtractionScript = ExtractionScript {
    name: "preview",
    version: 2,
    source: include_str!("scripts/preview.js"),
};

/// Noise removal, link-density filtering and main-content isolation
pub static ARTICLE_SCRIPT: ExtractionScript = ExtractionScript {
    name: "article",
    version: 3,
    source: include_str!("scripts/article.js"),
};

impl ExtractionScript {
    /// `probe@v1`
    pub fn id(&self) -> String {
        format!("{}@v{}", self.name, self.version)
    }

    pub fn call<A: Serialize>(&'static self, args: &A) -> ScriptCall {
        ScriptCall {
            script: self,
            args: serde_json::to_value(args).unwrap_or(Value::Null),
        }
    }

    pub fn call_without_args(&'static self) -> ScriptCall {
        self.call(&json!({}))
    }
}

/// One invocation of a script with its arguments
#[derive(Debug, Clone)]
pub struct ScriptCall {
    pub script: &'static ExtractionScript,
    pub args: Value,
}

impl ScriptCall {
    pub fn name(&self) -> &'static str {
        self.script.name
    }

    /// The expression evaluated in the page: `(<source>)(<args>)`
    pub fn expression(&self) -> String {
        format!("({})({})", self.script.source.trim().trim_end_matches(';'), self.args)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeArgs<'a> {
    /// Selectors whose presence the probe reports back
    pub selectors: &'a [&'a str],
    pub text_limit: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleArgs<'a> {
    pub noise_selectors: &'a [String],
    pub link_density_threshold: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_are_function_expressions() {
        for script in [PROBE_SCRIPT, READINESS_SCRIPT, PREVIEW_SCRIPT, ARTICLE_SCRIPT] {
            let source = script.source.trim_start();
            assert!(source.starts_with("(args) =>"), "{} is not a function", script.id());
        }
    }

    #[test]
    fn test_call_expression_serializes_args() {
        let selectors = ["#challenge-form", "iframe[src*=\"captcha\"]"];
        let call = PROBE_SCRIPT.call(&ProbeArgs {
            selectors: &selectors,
            text_limit: 4000,
        });

        let expr = call.expression();
        assert!(expr.starts_with("((args) =>"));
        assert!(expr.ends_with(r##"({"selectors":["#challenge-form","iframe[src*=\"captcha\"]"],"textLimit":4000})"##));
        assert_eq!(call.name(), "probe");
    }

    #[test]
    fn test_article_args_shape() {
        let noise = vec!["nav".to_string()];
        let call = ARTICLE_SCRIPT.call(&ArticleArgs {
            noise_selectors: &noise,
            link_density_threshold: 0.5,
        });
        assert_eq!(call.args["noiseSelectors"][0], "nav");
        assert_eq!(call.args["linkDensityThreshold"], 0.5);
        assert_eq!(ARTICLE_SCRIPT.id(), "article@v3");
    }
}
