use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use serde::{Deserialize, Serialize};

/// One served version of a custom resource definition, flattened into what
/// the resource views need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Crd {
    /// `<plural>.<group>/<version>`
    pub id: String,
    /// API path, e.g. `/apis/kobs.io/v1`.
    pub path: String,
    pub resource: String,
    pub title: String,
    pub description: String,
    pub scope: String,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub json_path: String,
}

impl Crd {
    /// One descriptor per version of `crd`. Only printer columns with
    /// priority 0 are kept.
    pub fn from_definition(crd: &CustomResourceDefinition) -> Vec<Crd> {
        let spec = &crd.spec;
        spec.versions
            .iter()
            .map(|version| {
                let description = version
                    .schema
                    .as_ref()
                    .and_then(|s| s.open_api_v3_schema.as_ref())
                    .and_then(|s| s.description.clone())
                    .unwrap_or_default();
                let columns = version
                    .additional_printer_columns
                    .iter()
                    .flatten()
                    .filter(|c| c.priority.unwrap_or(0) == 0)
                    .map(|c| Column {
                        name: c.name.clone(),
                        description: c.description.clone().unwrap_or_default(),
                        column_type: c.type_.clone(),
                        json_path: c.json_path.clone(),
                    })
                    .collect();
                Crd {
                    id: format!("{}.{}/{}", spec.names.plural, spec.group, version.name),
                    path: format!("/apis/{}/{}", spec.group, version.name),
                    resource: spec.names.plural.clone(),
                    title: spec.names.kind.clone(),
                    description,
                    scope: spec.scope.clone(),
                    columns,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_per_version_with_priority_zero_columns() {
        let crd: CustomResourceDefinition = serde_json::from_value(serde_json::json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {"name": "applications.kobs.io"},
            "spec": {
                "group": "kobs.io",
                "scope": "Namespaced",
                "names": {"plural": "applications", "kind": "Application"},
                "versions": [{
                    "name": "v1",
                    "served": true,
                    "storage": true,
                    "schema": {"openAPIV3Schema": {"type": "object", "description": "Apps"}},
                    "additionalPrinterColumns": [
                        {"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"},
                        {"name": "Hidden", "type": "string", "jsonPath": ".spec.x", "priority": 1}
                    ]
                }]
            }
        }))
        .unwrap();

        let crds = Crd::from_definition(&crd);
        assert_eq!(crds.len(), 1);
        assert_eq!(crds[0].id, "applications.kobs.io/v1");
        assert_eq!(crds[0].path, "/apis/kobs.io/v1");
        assert_eq!(crds[0].description, "Apps");
        assert_eq!(crds[0].columns.len(), 1);
        assert_eq!(crds[0].columns[0].name, "Age");
    }
}
