//! Roles of a Spark application and the property keys Spark reads per role.
//!
//! Spark names most of its Kubernetes properties after the role they apply to, e.g.
//! `spark.kubernetes.driver.label.<name>` and `spark.kubernetes.executor.label.<name>`.
//! The functions here return the right variant for a role so the document builder can emit
//! both roles with the same code.

use const_format::concatcp;
use serde::{Deserialize, Serialize};
use stackable_operator::schemars::{self, JsonSchema};
use strum::{Display, EnumIter};

const SPARK_KUBERNETES: &str = "spark.kubernetes.";
const DRIVER: &str = "driver";
const EXECUTOR: &str = "executor";

macro_rules! role_keys {
    ($role:expr) => {
        RoleKeys {
            label_prefix: concatcp!(SPARK_KUBERNETES, $role, ".label."),
            annotation_prefix: concatcp!(SPARK_KUBERNETES, $role, ".annotation."),
            secret_key_ref_prefix: concatcp!(SPARK_KUBERNETES, $role, ".secretKeyRef."),
            secrets_prefix: concatcp!(SPARK_KUBERNETES, $role, ".secrets."),
            volumes_prefix: concatcp!(SPARK_KUBERNETES, $role, ".volumes."),
            container_image: concatcp!(SPARK_KUBERNETES, $role, ".container.image"),
            request_cores: concatcp!(SPARK_KUBERNETES, $role, ".request.cores"),
            limit_cores: concatcp!(SPARK_KUBERNETES, $role, ".limit.cores"),
            service_account_name: concatcp!(
                SPARK_KUBERNETES,
                "authenticate.",
                $role,
                ".serviceAccountName"
            ),
            cores: concatcp!("spark.", $role, ".cores"),
            memory: concatcp!("spark.", $role, ".memory"),
            memory_overhead: concatcp!("spark.", $role, ".memoryOverhead"),
            extra_java_options: concatcp!("spark.", $role, ".extraJavaOptions"),
        }
    };
}

/// Property keys that differ only by the role name embedded in them.
#[derive(Debug, PartialEq, Eq)]
pub struct RoleKeys {
    pub label_prefix: &'static str,
    pub annotation_prefix: &'static str,
    pub secret_key_ref_prefix: &'static str,
    pub secrets_prefix: &'static str,
    pub volumes_prefix: &'static str,
    pub container_image: &'static str,
    pub request_cores: &'static str,
    pub limit_cores: &'static str,
    pub service_account_name: &'static str,
    pub cores: &'static str,
    pub memory: &'static str,
    pub memory_overhead: &'static str,
    pub extra_java_options: &'static str,
}

const DRIVER_KEYS: RoleKeys = role_keys!(DRIVER);
const EXECUTOR_KEYS: RoleKeys = role_keys!(EXECUTOR);

#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumIter, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SparkApplicationRole {
    Driver,
    Executor,
}

impl SparkApplicationRole {
    pub fn keys(&self) -> &'static RoleKeys {
        match self {
            SparkApplicationRole::Driver => &DRIVER_KEYS,
            SparkApplicationRole::Executor => &EXECUTOR_KEYS,
        }
    }

    /// Prefix under which environment variables for this role's container are declared.
    ///
    /// The two roles do not follow a common naming scheme here.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            SparkApplicationRole::Driver => super::constants::SPARK_DRIVER_ENV_PREFIX,
            SparkApplicationRole::Executor => super::constants::SPARK_EXECUTOR_ENV_PREFIX,
        }
    }
}
