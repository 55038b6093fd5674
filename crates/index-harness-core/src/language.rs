//! Content-type and language detection by file extension.

/// Result of [`detect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detected {
    pub content_type: &'static str,
    pub language: Option<&'static str>,
    /// `code`, `docs`, `config`, or `other`.
    pub domain: &'static str,
}

impl Detected {
    pub fn is_code(&self) -> bool {
        self.domain == "code"
    }
}

pub fn detect(path: &str) -> Detected {
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    let (content_type, language, domain) = match ext.as_str() {
        "rs" => ("text/x-rust", Some("rust"), "code"),
        "py" => ("text/x-python", Some("python"), "code"),
        "js" | "mjs" | "cjs" | "jsx" => ("text/javascript", Some("javascript"), "code"),
        "ts" | "tsx" => ("text/x-typescript", Some("typescript"), "code"),
        "go" => ("text/x-go", Some("go"), "code"),
        "java" => ("text/x-java", Some("java"), "code"),
        "kt" | "kts" => ("text/x-kotlin", Some("kotlin"), "code"),
        "c" | "h" => ("text/x-c", Some("c"), "code"),
        "cc" | "cpp" | "cxx" | "hpp" => ("text/x-c++", Some("cpp"), "code"),
        "rb" => ("text/x-ruby", Some("ruby"), "code"),
        "md" | "markdown" => ("text/markdown", Some("markdown"), "docs"),
        "rst" => ("text/x-rst", Some("rst"), "docs"),
        "txt" => ("text/plain", None, "docs"),
        "toml" => ("application/toml", Some("toml"), "config"),
        "yaml" | "yml" => ("application/yaml", Some("yaml"), "config"),
        "json" => ("application/json", Some("json"), "config"),
        _ => ("text/plain", None, "other"),
    };

    Detected {
        content_type,
        language,
        domain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_code() {
        let d = detect("src/graph/mod.rs");
        assert_eq!(d.language, Some("rust"));
        assert!(d.is_code());
        assert_eq!(detect("web/App.TSX").language, Some("typescript"));
    }

    #[test]
    fn test_detects_docs_and_config() {
        assert_eq!(detect("README.md").domain, "docs");
        assert_eq!(detect("Cargo.toml").domain, "config");
    }

    #[test]
    fn test_unknown_extension() {
        let d = detect("Makefile");
        assert_eq!(d.content_type, "text/plain");
        assert_eq!(d.language, None);
        assert_eq!(d.domain, "other");
        assert_eq!(detect("dir.v2/LICENSE").domain, "other");
    }
}
