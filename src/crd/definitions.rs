//! CustomResourceDefinition manifests for broker resource kinds

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceColumnDefinition, CustomResourceDefinition, CustomResourceDefinitionNames,
    CustomResourceDefinitionSpec, CustomResourceDefinitionVersion, CustomResourceValidation,
    JSONSchemaProps,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;

use super::{ResourceKind, ResourceSpec, ResourceStatus, API_VERSION};
use crate::error::Result;

/// Build the CRD manifest for one resource kind
pub fn crd_for(kind: &ResourceKind) -> Result<CustomResourceDefinition> {
    let mut properties = std::collections::BTreeMap::new();
    properties.insert("spec".to_string(), schema_for::<ResourceSpec>()?);
    properties.insert("status".to_string(), schema_for::<ResourceStatus>()?);

    let schema = JSONSchemaProps {
        type_: Some("object".to_string()),
        properties: Some(properties),
        ..Default::default()
    };

    let version = CustomResourceDefinitionVersion {
        name: API_VERSION.to_string(),
        served: true,
        storage: true,
        schema: Some(CustomResourceValidation {
            open_api_v3_schema: Some(schema),
        }),
        additional_printer_columns: Some(vec![
            column("State", "string", ".status.state"),
            column("Age", "date", ".metadata.creationTimestamp"),
        ]),
        ..Default::default()
    };

    Ok(CustomResourceDefinition {
        metadata: ObjectMeta {
            name: Some(kind.crd_name()),
            ..Default::default()
        },
        spec: CustomResourceDefinitionSpec {
            group: kind.group.api_group().to_string(),
            names: CustomResourceDefinitionNames {
                kind: kind.resource_type.kind().to_string(),
                plural: kind.resource_type.plural(),
                singular: Some(kind.resource_type.singular()),
                ..Default::default()
            },
            scope: "Namespaced".to_string(),
            versions: vec![version],
            ..Default::default()
        },
        status: None,
    })
}

fn schema_for<T: JsonSchema>() -> Result<JSONSchemaProps> {
    let gen = SchemaSettings::openapi3()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        })
        .into_generator();
    let root = gen.into_root_schema_for::<T>();
    let mut value = serde_json::to_value(root.schema)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("title");
    }
    Ok(serde_json::from_value(value)?)
}

fn column(name: &str, type_: &str, json_path: &str) -> CustomResourceColumnDefinition {
    CustomResourceColumnDefinition {
        name: name.to_string(),
        type_: type_.to_string(),
        json_path: json_path.to_string(),
        ..Default::default()
    }
}
