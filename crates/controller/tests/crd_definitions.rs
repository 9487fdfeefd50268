//! Generated CustomResourceDefinitions

use analysis_controller::crds::all_crds;

#[test]
fn test_all_kinds_are_generated() {
    let crds = all_crds();
    let names: Vec<_> = crds
        .iter()
        .map(|crd| crd.metadata.name.clone().unwrap_or_default())
        .collect();

    assert_eq!(
        names,
        vec![
            "aimanifestanalyses.ai.example.com",
            "ainetworkpolicyaudits.ai.example.com",
            "aipodsecurityassessments.ai.example.com",
            "aisecretsaudits.ai.example.com",
            "aisecurityanomalies.ai.example.com",
        ]
    );
}

#[test]
fn test_crds_are_namespaced_with_status_subresource() {
    for crd in all_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        assert_eq!(crd.spec.group, "ai.example.com", "{name}");
        assert_eq!(crd.spec.scope, "Namespaced", "{name}");
        assert_eq!(crd.spec.versions.len(), 1, "{name}");

        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1alpha1", "{name}");
        assert!(version.served && version.storage, "{name}");
        assert!(
            version
                .subresources
                .as_ref()
                .and_then(|s| s.status.as_ref())
                .is_some(),
            "{name} must expose the status subresource"
        );
    }
}

#[test]
fn test_short_names() {
    let short_names: Vec<Vec<String>> = all_crds()
        .into_iter()
        .map(|crd| crd.spec.names.short_names.unwrap_or_default())
        .collect();

    assert_eq!(
        short_names,
        vec![
            vec!["ama".to_string()],
            vec!["anpa".to_string()],
            vec!["apsa".to_string()],
            vec!["asaud".to_string()],
            vec!["asa".to_string()],
        ]
    );
}

#[test]
fn test_status_schema_has_conditions_and_generation() {
    for crd in all_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        let schema = serde_json::to_value(&crd.spec.versions[0].schema).unwrap();
        let status = &schema["openAPIV3Schema"]["properties"]["status"]["properties"];
        assert!(status.get("conditions").is_some(), "{name}");
        assert!(status.get("observedGeneration").is_some(), "{name}");
    }
}

#[test]
fn test_crdgen_output_is_valid_yaml() {
    let stream: String = all_crds()
        .iter()
        .map(|crd| format!("---\n{}", serde_yaml::to_string(crd).unwrap()))
        .collect();

    let documents: Vec<serde_yaml::Value> = serde_yaml::Deserializer::from_str(&stream)
        .map(|doc| serde::Deserialize::deserialize(doc).unwrap())
        .collect();
    assert_eq!(documents.len(), 5);
    assert!(documents
        .iter()
        .all(|doc| doc["kind"] == "CustomResourceDefinition"));
}
