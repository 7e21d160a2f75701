//! Source-location parsing strategies.
//!
//! Analyzers for different languages encode locations differently. The
//! builder receives an ordered list of [`LocationParser`]s and uses the first
//! one that accepts a location.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// File/class/method coordinates extracted from a finding's location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file_path: String,
    pub language: String,
    pub package: String,
    pub class_name: String,
    pub method_name: String,
    pub signature: String,
    pub line: u32,
}

/// A strategy turning a location string into coordinates.
pub trait LocationParser: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Parse a location, or `None` when this strategy does not apply.
    fn parse(&self, location: &str) -> Option<SourceLocation>;
}

static QUALIFIED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<path>[^#\s]+)#(?P<member>[^:#\s][^:#]*?)(?::(?P<line>\d+))?$")
        .expect("valid qualified location regex")
});

static PYTHON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<path>[^:\s]+\.py):(?P<member>[A-Za-z_][\w.]*)(?::(?P<line>\d+))?$")
        .expect("valid python location regex")
});

/// Parses `path#Class.method:line`, `path#method:line` and
/// `path#method(Type, Type):line`.
///
/// When the member has no class qualifier, the class is named after the
/// file stem (`UserDao#find:10` lives in class `UserDao`).
#[derive(Debug, Clone)]
pub struct QualifiedLocationParser {
    default_extension: Option<String>,
    default_language: String,
}

impl QualifiedLocationParser {
    /// A parser for paths that always carry their extension.
    pub fn new(default_language: impl Into<String>) -> Self {
        Self {
            default_extension: None,
            default_language: default_language.into(),
        }
    }

    /// Java flavour: `UserDao#find:10` resolves to `UserDao.java`.
    pub fn java() -> Self {
        Self {
            default_extension: Some("java".to_string()),
            default_language: "java".to_string(),
        }
    }

    /// Append `extension` to paths that have none.
    pub fn with_default_extension(mut self, extension: impl Into<String>) -> Self {
        self.default_extension = Some(extension.into());
        self
    }
}

impl LocationParser for QualifiedLocationParser {
    fn name(&self) -> &str {
        "qualified"
    }

    fn parse(&self, location: &str) -> Option<SourceLocation> {
        let caps = QUALIFIED.captures(location.trim())?;
        let mut file_path = caps["path"].to_string();
        if Path::new(&file_path).extension().is_none() {
            if let Some(ext) = &self.default_extension {
                file_path = format!("{}.{}", file_path, ext);
            }
        }

        let member = caps["member"].trim();
        let (head, params) = match member.find('(') {
            Some(idx) if member.ends_with(')') => (&member[..idx], Some(&member[idx..])),
            Some(_) => return None,
            None => (member, None),
        };
        let (class_name, method_name) = match head.rsplit_once('.') {
            Some((class, method)) => (class.to_string(), method.to_string()),
            None => (file_stem(&file_path)?, head.to_string()),
        };
        if class_name.is_empty() || method_name.is_empty() {
            return None;
        }

        let signature = match params {
            Some(params) => format!("{}{}", method_name, normalize_params(params)),
            None => method_name.clone(),
        };
        let line = parse_line(caps.name("line").map(|m| m.as_str()))?;

        Some(SourceLocation {
            language: language_for(&file_path).unwrap_or(&self.default_language).to_string(),
            package: package_for(&file_path),
            file_path,
            class_name,
            method_name,
            signature,
            line,
        })
    }
}

/// Parses `pkg/module.py:Class.method:line` and `pkg/module.py:function:line`.
///
/// Module-level functions are grouped under a class named after the module.
#[derive(Debug, Clone, Default)]
pub struct PythonLocationParser;

impl LocationParser for PythonLocationParser {
    fn name(&self) -> &str {
        "python"
    }

    fn parse(&self, location: &str) -> Option<SourceLocation> {
        let caps = PYTHON.captures(location.trim())?;
        let file_path = caps["path"].to_string();
        let member = &caps["member"];
        let (class_name, method_name) = match member.rsplit_once('.') {
            Some((class, method)) if !class.is_empty() && !method.is_empty() => {
                (class.to_string(), method.to_string())
            }
            Some(_) => return None,
            None => (file_stem(&file_path)?, member.to_string()),
        };
        let line = parse_line(caps.name("line").map(|m| m.as_str()))?;

        Some(SourceLocation {
            language: "python".to_string(),
            package: package_for(&file_path),
            signature: method_name.clone(),
            file_path,
            class_name,
            method_name,
            line,
        })
    }
}

fn parse_line(raw: Option<&str>) -> Option<u32> {
    match raw {
        Some(raw) => raw.parse().ok(),
        None => Some(0),
    }
}

fn file_stem(path: &str) -> Option<String> {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn normalize_params(params: &str) -> String {
    let inner = params.trim_start_matches('(').trim_end_matches(')');
    let parts: Vec<&str> = inner
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    format!("({})", parts.join(","))
}

/// Language inferred from a file extension.
pub fn language_for(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?;
    let lang = match ext.to_lowercase().as_str() {
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "py" => "python",
        "cs" => "csharp",
        "go" => "go",
        "rs" => "rust",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "rb" => "ruby",
        "php" => "php",
        _ => return None,
    };
    Some(lang)
}

const SOURCE_ROOTS: &[&str] = &[
    "src/main/java/",
    "src/main/kotlin/",
    "src/main/scala/",
    "src/test/java/",
    "src/",
    "lib/",
];

/// Dotted package derived from the directories of a path.
fn package_for(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let mut rel = normalized.trim_start_matches("./");
    for root in SOURCE_ROOTS {
        if let Some(stripped) = rel.strip_prefix(root) {
            rel = stripped;
            break;
        }
    }
    match rel.rsplit_once('/') {
        Some((dirs, _)) => dirs.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("."),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_java_bare_class() {
        let loc = QualifiedLocationParser::java().parse("UserDao#find:10").unwrap();
        assert_eq!(loc.file_path, "UserDao.java");
        assert_eq!(loc.class_name, "UserDao");
        assert_eq!(loc.method_name, "find");
        assert_eq!(loc.signature, "find");
        assert_eq!(loc.line, 10);
        assert_eq!(loc.language, "java");
        assert_eq!(loc.package, "");
    }

    #[test]
    fn test_qualified_with_path_and_class() {
        let parser = QualifiedLocationParser::java();
        let loc = parser
            .parse("src/main/java/com/acme/UserDao.java#UserDao.findById(Long, String):42")
            .unwrap();
        assert_eq!(loc.file_path, "src/main/java/com/acme/UserDao.java");
        assert_eq!(loc.package, "com.acme");
        assert_eq!(loc.class_name, "UserDao");
        assert_eq!(loc.method_name, "findById");
        assert_eq!(loc.signature, "findById(Long,String)");
        assert_eq!(loc.line, 42);
    }

    #[test]
    fn test_qualified_language_from_extension() {
        let parser = QualifiedLocationParser::new("unknown");
        let loc = parser.parse("app/repo.kt#Repo.save:3").unwrap();
        assert_eq!(loc.language, "kotlin");
        let loc = parser.parse("app/repo.xyz#Repo.save").unwrap();
        assert_eq!(loc.language, "unknown");
        assert_eq!(loc.line, 0);
    }

    #[test]
    fn test_qualified_rejects_garbage() {
        let parser = QualifiedLocationParser::java();
        assert!(parser.parse("no-hash-here").is_none());
        assert!(parser.parse("File#:10").is_none());
        assert!(parser.parse("File#m(int:10").is_none());
        assert!(parser.parse("").is_none());
    }

    #[test]
    fn test_python_method_and_function() {
        let parser = PythonLocationParser;
        let loc = parser.parse("app/repos/users.py:UserRepo.get:12").unwrap();
        assert_eq!(loc.class_name, "UserRepo");
        assert_eq!(loc.method_name, "get");
        assert_eq!(loc.package, "app.repos");

        let loc = parser.parse("app/jobs.py:cleanup:7").unwrap();
        assert_eq!(loc.class_name, "jobs");
        assert_eq!(loc.method_name, "cleanup");
        assert_eq!(loc.line, 7);
    }

    #[test]
    fn test_python_does_not_claim_java_locations() {
        assert!(PythonLocationParser.parse("UserDao#find:10").is_none());
    }
}
