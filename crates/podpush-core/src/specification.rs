//! Pod specification documents.
//!
//! A submission carries the pod's specification as a JSON object. The pod
//! name and version written into the index repository come from the document
//! itself, never from whoever submits it.

use serde_json::{Map, Value};

use crate::{Error, Result};

/// Where a pod's source code is fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecSource {
    /// An archive downloaded over HTTP(S).
    Http(String),
    /// A git repository and the ref to check out (tag, commit, branch, or
    /// `HEAD` when none is given).
    Git { url: String, reference: String },
    /// Any other kind of source (svn, hg, local path); not checked.
    Other,
}

/// A parsed specification document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specification {
    name: String,
    version: String,
    source: Option<SpecSource>,
}

impl Specification {
    /// Parse a JSON specification, rejecting anything but an object with a
    /// usable `name` and `version`.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| Error::InvalidInput(format!("specification is not valid JSON: {}", e)))?;
        let Value::Object(document) = value else {
            return Err(Error::InvalidInput(
                "specification must be a JSON object".to_string(),
            ));
        };

        let name = path_component(&document, "name")?;
        let version = path_component(&document, "version")?;
        let source = document
            .get("source")
            .and_then(Value::as_object)
            .map(parse_source);

        Ok(Self {
            name,
            version,
            source,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn source(&self) -> Option<&SpecSource> {
        self.source.as_ref()
    }
}

/// A required string field that becomes part of a repository path.
fn path_component(document: &Map<String, Value>, field: &str) -> Result<String> {
    let value = match document.get(field) {
        Some(Value::String(s)) => s.trim().to_string(),
        // Versions written as bare numbers, e.g. `"version": 1.0`.
        Some(Value::Number(n)) if field == "version" => n.to_string(),
        Some(_) => {
            return Err(Error::InvalidInput(format!(
                "specification `{}` must be a string",
                field
            )));
        }
        None => {
            return Err(Error::InvalidInput(format!(
                "specification has no `{}`",
                field
            )));
        }
    };

    if value.is_empty() || value.contains('/') || value.starts_with('.') {
        return Err(Error::InvalidInput(format!(
            "specification `{}` is not usable as a path component: {:?}",
            field, value
        )));
    }
    Ok(value)
}

fn parse_source(source: &Map<String, Value>) -> SpecSource {
    let text = |key: &str| source.get(key).and_then(Value::as_str).map(str::to_string);

    if let Some(url) = text("http") {
        return SpecSource::Http(url);
    }
    if let Some(url) = text("git") {
        let reference = text("tag")
            .or_else(|| text("commit"))
            .or_else(|| text("branch"))
            .unwrap_or_else(|| "HEAD".to_string());
        return SpecSource::Git { url, reference };
    }
    SpecSource::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_version_come_from_document() {
        let spec = Specification::from_json(
            r#"{
                "name": "AFNetworking",
                "version": "1.2.0",
                "source": { "git": "https://github.com/AFNetworking/AFNetworking.git", "tag": "1.2.0" }
            }"#,
        )
        .unwrap();

        assert_eq!(spec.name(), "AFNetworking");
        assert_eq!(spec.version(), "1.2.0");
        assert_eq!(
            spec.source(),
            Some(&SpecSource::Git {
                url: "https://github.com/AFNetworking/AFNetworking.git".to_string(),
                reference: "1.2.0".to_string(),
            })
        );
    }

    #[test]
    fn test_rejects_non_objects() {
        for json in ["[]", "\"AFNetworking\"", "42", "null"] {
            let err = Specification::from_json(json).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{}", json);
        }
        assert!(matches!(
            Specification::from_json("{not json"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_requires_usable_name_and_version() {
        assert!(Specification::from_json(r#"{ "version": "1.0" }"#).is_err());
        assert!(Specification::from_json(r#"{ "name": "Pod" }"#).is_err());
        assert!(Specification::from_json(r#"{ "name": "", "version": "1.0" }"#).is_err());
        assert!(Specification::from_json(r#"{ "name": "../Pod", "version": "1.0" }"#).is_err());
        assert!(Specification::from_json(r#"{ "name": ["Pod"], "version": "1.0" }"#).is_err());
    }

    #[test]
    fn test_numeric_version() {
        let spec = Specification::from_json(r#"{ "name": "Pod", "version": 2 }"#).unwrap();
        assert_eq!(spec.version(), "2");
    }

    #[test]
    fn test_source_kinds() {
        let http = Specification::from_json(
            r#"{ "name": "Pod", "version": "1.0", "source": { "http": "https://example.com/pod.zip" } }"#,
        )
        .unwrap();
        assert_eq!(
            http.source(),
            Some(&SpecSource::Http("https://example.com/pod.zip".to_string()))
        );

        let git = Specification::from_json(
            r#"{ "name": "Pod", "version": "1.0", "source": { "git": "https://example.com/pod.git" } }"#,
        )
        .unwrap();
        assert!(matches!(git.source(), Some(SpecSource::Git { reference, .. }) if reference == "HEAD"));

        let svn = Specification::from_json(
            r#"{ "name": "Pod", "version": "1.0", "source": { "svn": "svn://example.com/pod" } }"#,
        )
        .unwrap();
        assert_eq!(svn.source(), Some(&SpecSource::Other));

        let none = Specification::from_json(r#"{ "name": "Pod", "version": "1.0" }"#).unwrap();
        assert_eq!(none.source(), None);
    }
}
