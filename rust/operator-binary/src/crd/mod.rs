//! This module provides the SparkApplication CRD and helper methods to read it.

use std::collections::BTreeMap;

use constants::*;
use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::api::core::v1::{Container, SecurityContext, Toleration, Volume, VolumeMount},
    kube::{CustomResource, ResourceExt},
    schemars::{self, JsonSchema},
    utils::crds::raw_object_list_schema,
};
use strum::Display;

use crate::crd::roles::SparkApplicationRole;

pub mod constants;
pub mod memory;
pub mod roles;

/// A Spark application as accepted by the Spark operator's `sparkoperator.k8s.io/v1beta2` API.
///
/// Only the fields needed to derive the driver ConfigMap, Pod and Service are modelled here.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "sparkoperator.k8s.io",
    version = "v1beta2",
    kind = "SparkApplication",
    shortname = "sparkapp",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct SparkApplicationSpec {
    /// Application language: `Java`, `Scala`, `Python` or `R`.
    #[serde(default, rename = "type")]
    pub app_type: String,

    #[serde(default)]
    pub mode: DeployMode,

    /// Image used for the driver and executors unless overridden per role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Names of Secrets used to pull the images.
    #[serde(default)]
    pub image_pull_secrets: Vec<String>,

    /// The main class - i.e. entry point - for JVM artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_application_file: Option<String>,

    /// Arguments passed directly to the application artifact.
    #[serde(default)]
    pub arguments: Vec<String>,

    /// Spark properties, passed on to the driver as they are.
    #[serde(default)]
    pub spark_conf: BTreeMap<String, String>,

    /// Hadoop properties, passed on with the `spark.hadoop.` prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hadoop_conf: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hadoop_config_map: Option<String>,

    /// Volumes that can be mounted into the driver and executors.
    #[serde(default)]
    #[schemars(schema_with = "raw_object_list_schema")]
    pub volumes: Vec<Volume>,

    #[serde(default)]
    pub driver: DriverSpec,

    #[serde(default)]
    pub executor: ExecutorSpec,

    #[serde(default)]
    pub deps: Dependencies,

    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_overhead_factor: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_allocation: Option<DynamicAllocation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DeployMode {
    #[default]
    Cluster,
    Client,
    InClusterClient,
}

/// Settings shared by the driver and the executors.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SparkPodSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<i32>,

    /// CPU request, e.g. `500m`. Takes precedence over `cores` for the pod.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_request: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_limit: Option<String>,

    /// JVM heap, e.g. `512m` or `2g`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    /// Memory on top of the heap. Either a quantity (`256m`) or a bare factor (`0.2`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_overhead: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// ConfigMaps to mount, each at its own path.
    #[serde(default)]
    pub config_maps: Vec<NamePath>,

    #[serde(default)]
    pub secrets: Vec<SecretInfo>,

    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,

    /// Environment variables read from Secret keys.
    #[serde(default)]
    pub env_secret_key_refs: BTreeMap<String, NameKey>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,

    #[serde(default)]
    #[schemars(schema_with = "raw_object_list_schema")]
    pub sidecars: Vec<Container>,

    #[serde(default)]
    #[schemars(schema_with = "raw_object_list_schema")]
    pub init_containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java_options: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverSpec {
    #[serde(flatten)]
    pub pod: SparkPodSpec,

    /// Name of the driver pod. Defaults to `<application name>-driver`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_master: Option<String>,

    #[serde(default)]
    pub service_annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorSpec {
    #[serde(flatten)]
    pub pod: SparkPodSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_on_termination: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependencies {
    #[serde(default)]
    pub jars: Vec<String>,

    #[serde(default)]
    pub archives: Vec<String>,

    #[serde(default)]
    pub files: Vec<String>,

    #[serde(default)]
    pub py_files: Vec<String>,

    /// Maven coordinates of packages to resolve, e.g. `org.apache.hadoop:hadoop-aws:3.3.4`.
    #[serde(default)]
    pub packages: Vec<String>,

    #[serde(default)]
    pub exclude_packages: Vec<String>,

    #[serde(default)]
    pub repositories: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicAllocation {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_executors: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_executors: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_executors: Option<i32>,

    /// Milliseconds after which shuffle data of idle executors is released.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle_tracking_timeout: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_properties_file: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
pub struct NamePath {
    pub name: String,
    pub path: String,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
pub struct NameKey {
    pub name: String,
    pub key: String,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretInfo {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub secret_type: SecretType,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
pub enum SecretType {
    /// Contains a `key.json` service account key for Google Cloud.
    GCPServiceAccount,
    /// Contains a `hadoop.token` delegation token file.
    HadoopDelegationToken,
    #[default]
    Generic,
}

impl SparkApplication {
    pub fn pod_spec(&self, role: SparkApplicationRole) -> &SparkPodSpec {
        match role {
            SparkApplicationRole::Driver => &self.spec.driver.pod,
            SparkApplicationRole::Executor => &self.spec.executor.pod,
        }
    }

    pub fn namespace_or_default(&self) -> String {
        self.namespace()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }

    /// The driver pod name: explicitly set, taken from the Spark properties or derived from
    /// the application name, in that order.
    pub fn driver_pod_name(&self) -> String {
        self.spec
            .driver
            .pod_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or_else(|| {
                self.spec
                    .spark_conf
                    .get(SPARK_DRIVER_POD_NAME)
                    .map(String::as_str)
                    .filter(|name| !name.is_empty())
            })
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}{DRIVER_POD_NAME_SUFFIX}", self.name_any()))
    }

    /// Environment variables declared for the driver through `spark.kubernetes.driverEnv.*`.
    pub fn driver_env(&self) -> impl Iterator<Item = (&str, &str)> {
        self.spec.spark_conf.iter().filter_map(|(key, value)| {
            key.strip_prefix(SPARK_DRIVER_ENV_PREFIX)
                .filter(|name| !name.is_empty())
                .map(|name| (name, value.as_str()))
        })
    }

    /// Local directories requested through `spark.kubernetes.driverEnv.SPARK_LOCAL_DIRS`.
    pub fn driver_env_local_dirs(&self) -> Vec<String> {
        self.driver_env()
            .filter(|(name, _)| *name == ENV_SPARK_LOCAL_DIRS)
            .flat_map(|(_, value)| split_paths(value))
            .collect()
    }

    /// Local directories requested through `spark.local.dir`.
    pub fn spark_local_dirs(&self) -> Vec<String> {
        self.spec
            .spark_conf
            .get(SPARK_LOCAL_DIR)
            .map(String::as_str)
            .map(split_paths)
            .unwrap_or_default()
    }

    pub fn local_dirs_on_tmpfs(&self) -> bool {
        self.spec
            .spark_conf
            .get(SPARK_LOCAL_DIRS_TMPFS)
            .is_some_and(|value| value == "true")
    }

    /// The application type in the lowercase form Spark expects, e.g. `Scala` becomes `java`.
    pub fn resource_type(&self) -> String {
        match self.spec.app_type.as_str() {
            "Java" | "Scala" => "java".to_string(),
            "Python" => "python".to_string(),
            "R" => "r".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_jvm(&self) -> bool {
        self.resource_type() == "java"
    }
}

fn split_paths(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect()
}
