//! Reading NetworkPolicy objects from YAML/JSON files and directories

use crate::error::{PolicyError, Result};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const POLICY_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Load policies from a file, or every policy file under a directory
pub fn load_policies_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<NetworkPolicy>> {
    let path = path.as_ref();
    let mut policies = Vec::new();

    for file in collect_policy_files(path)? {
        let contents = fs::read_to_string(&file).map_err(|source| PolicyError::Read {
            path: file.clone(),
            source,
        })?;
        let parsed = parse_policies(&contents)?;
        tracing::debug!("Read {} policies from {:?}", parsed.len(), file);
        policies.extend(parsed);
    }

    Ok(policies)
}

fn collect_policy_files(path: &Path) -> Result<Vec<PathBuf>> {
    let read_err = |source| PolicyError::Read {
        path: path.to_path_buf(),
        source,
    };

    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path).map_err(read_err)? {
        let entry_path = entry.map_err(read_err)?.path();
        if entry_path.is_dir() {
            files.extend(collect_policy_files(&entry_path)?);
        } else if entry_path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| POLICY_EXTENSIONS.contains(&e))
        {
            files.push(entry_path);
        }
    }
    files.sort();

    Ok(files)
}

/// Parse a document stream holding single policies, lists, or `NetworkPolicyList`s
pub fn parse_policies(contents: &str) -> Result<Vec<NetworkPolicy>> {
    let mut policies = Vec::new();

    for document in serde_yaml::Deserializer::from_str(contents) {
        let value = serde_yaml::Value::deserialize(document)?;
        policies.extend(policies_from_value(value)?);
    }

    Ok(policies)
}

fn policies_from_value(value: serde_yaml::Value) -> Result<Vec<NetworkPolicy>> {
    match value {
        serde_yaml::Value::Null => Ok(Vec::new()),
        serde_yaml::Value::Sequence(items) => items
            .into_iter()
            .map(|item| Ok(serde_yaml::from_value(item)?))
            .collect(),
        serde_yaml::Value::Mapping(mut map) => {
            match map.remove("items") {
                Some(items) => policies_from_value(items),
                None => Ok(vec![serde_yaml::from_value(serde_yaml::Value::Mapping(map))?]),
            }
        }
        other => Ok(vec![serde_yaml::from_value(other)?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SINGLE: &str = r#"
apiVersion: networking.k8s.io/v1
kind: NetworkPolicy
metadata:
  name: deny-all
  namespace: x
spec:
  podSelector: {}
  policyTypes: [Ingress]
"#;

    const LIST: &str = r#"
apiVersion: networking.k8s.io/v1
kind: NetworkPolicyList
items:
- metadata: {name: a, namespace: x}
  spec: {podSelector: {}, policyTypes: [Ingress]}
- metadata: {name: b, namespace: y}
  spec: {podSelector: {}, policyTypes: [Egress]}
"#;

    #[test]
    fn test_parse_single() {
        let policies = parse_policies(SINGLE).unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].metadata.name.as_deref(), Some("deny-all"));
    }

    #[test]
    fn test_parse_list_kind() {
        let policies = parse_policies(LIST).unwrap();
        let names: Vec<_> = policies
            .iter()
            .map(|p| p.metadata.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_multi_document_and_json() {
        let stream = format!("{}\n---\n{}", SINGLE, LIST);
        assert_eq!(parse_policies(&stream).unwrap().len(), 3);

        let json = r#"[{"metadata": {"name": "j"}, "spec": {"podSelector": {}, "policyTypes": ["Ingress"]}}]"#;
        assert_eq!(parse_policies(json).unwrap().len(), 1);
    }

    #[test]
    fn test_load_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("one.yaml"), SINGLE).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/two.yml"), LIST).unwrap();
        fs::write(dir.path().join("README.md"), "not a policy").unwrap();

        let policies = load_policies_from_path(dir.path()).unwrap();
        assert_eq!(policies.len(), 3);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_policies_from_path("/nonexistent/policy.yaml"),
            Err(PolicyError::Read { .. })
        ));
    }
}
