//! Submits a [`SparkApplication`] by writing its driver ConfigMap, Pod and Service.
//!
//! The stages run strictly in that order and the first failing stage aborts the submission.
//! Objects written by earlier stages are left in place, a later submission with the same
//! [`RunIdentity`] updates them.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    builder::{configmap::ConfigMapBuilder, meta::ObjectMetaBuilder},
    k8s_openapi::api::core::v1::{ConfigMap, Service},
    kube::ResourceExt,
};
use strum::{EnumDiscriminants, IntoStaticStr};
use uuid::Uuid;

use crate::{
    crd::{SparkApplication, constants::*},
    driver_pod::{self, build_driver_pod, driver_pod_labels},
    driver_service::{self, build_driver_service},
    local_dirs::split_local_dir_volumes,
    properties::{self, SubmissionDocument},
    store::{self, ResourceStore, RetryPolicy, Upserted, Visibility, await_visible, upsert},
};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to build the submission document for {name:?}"))]
    BuildSubmissionDocument {
        source: properties::Error,
        name: String,
    },

    #[snafu(display("object is missing metadata to build owner reference"))]
    ObjectMissingMetadataForOwnerRef {
        source: stackable_operator::builder::meta::Error,
    },

    #[snafu(display("invalid config map {name}"))]
    InvalidConfigMap {
        source: stackable_operator::builder::configmap::Error,
        name: String,
    },

    #[snafu(display("failed to build driver pod {name}"))]
    BuildDriverPod {
        source: driver_pod::Error,
        name: String,
    },

    #[snafu(display("failed to build driver service {name}"))]
    BuildDriverService {
        source: driver_service::Error,
        name: String,
    },

    #[snafu(display("failed to apply {kind} {name}"))]
    Apply {
        source: store::Error,
        kind: String,
        name: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

/// Inputs taken from the environment of the submitting process.
#[derive(Clone, Debug)]
pub struct SubmitEnvironment {
    pub kubernetes_service_host: String,
    pub kubernetes_service_port: String,
    /// Becomes `SPARK_USER` of the driver.
    pub spark_user: String,
    /// A `spark-defaults.conf` style file, skipped if it does not exist.
    pub defaults_file: PathBuf,
}

/// Names shared by all objects of one submission.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunIdentity {
    pub run_id: String,
    pub submission_id: String,
    pub app_name: String,
    pub namespace: String,
    pub driver_pod_name: String,
    pub service_name: String,
    pub config_map_name: String,
}

impl RunIdentity {
    /// Identity of a new run with a freshly generated run id.
    pub fn new(spark_application: &SparkApplication, submission_id: &str) -> Self {
        let run_id = format!("{SPARK_ID_PREFIX}-{}", Uuid::new_v4().simple());
        Self::with_run_id(spark_application, submission_id, &run_id)
    }

    pub fn with_run_id(
        spark_application: &SparkApplication,
        submission_id: &str,
        run_id: &str,
    ) -> Self {
        let driver_pod_name = spark_application.driver_pod_name();
        Self {
            run_id: run_id.to_string(),
            submission_id: submission_id.to_string(),
            app_name: spark_application.name_any(),
            namespace: spark_application.namespace_or_default(),
            service_name: service_name(&driver_pod_name, Utc::now()),
            config_map_name: format!("{driver_pod_name}{CONFIG_MAP_NAME_SUFFIX}"),
            driver_pod_name,
        }
    }
}

/// `<driverPod>-svc`, or a generated name if that is no valid DNS label.
fn service_name(driver_pod_name: &str, now: DateTime<Utc>) -> String {
    let name = format!("{driver_pod_name}{SERVICE_NAME_SUFFIX}");
    if name.len() <= MAX_DNS_LABEL_LENGTH {
        return name;
    }
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "{SPARK_ID_PREFIX}-{}{}{LONG_SERVICE_NAME_SUFFIX}",
        &random[..16],
        now.timestamp()
    )
}

/// What a submission did to each object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubmissionReport {
    pub run_id: String,
    pub config_map: Upserted,
    pub driver_pod: Upserted,
    pub service: Upserted,
    pub service_visibility: Visibility,
}

pub async fn submit(
    store: &impl ResourceStore,
    spark_application: &SparkApplication,
    identity: &RunIdentity,
    environment: &SubmitEnvironment,
    submitted_at: DateTime<Utc>,
) -> Result<SubmissionReport> {
    tracing::info!(
        run_id = %identity.run_id,
        submission_id = %identity.submission_id,
        namespace = %identity.namespace,
        driver_pod = %identity.driver_pod_name,
        "Submitting Spark application"
    );

    let split = split_local_dir_volumes(&spark_application.spec);
    let document = properties::build(
        spark_application,
        identity,
        environment,
        &split.conf_options,
        submitted_at,
    )
    .context(BuildSubmissionDocumentSnafu {
        name: &identity.app_name,
    })?;

    let config_map = build_config_map(spark_application, identity, &document)?;
    let config_map = apply(store, &config_map).await?;

    let driver_pod = build_driver_pod(spark_application, &split, identity, environment)
        .context(BuildDriverPodSnafu {
            name: &identity.driver_pod_name,
        })?;
    let driver_pod = apply(store, &driver_pod).await?;

    let service = build_driver_service(
        spark_application,
        identity,
        driver_pod_labels(spark_application, identity),
    )
    .context(BuildDriverServiceSnafu {
        name: &identity.service_name,
    })?;
    let service = apply(store, &service).await?;

    let service_visibility = match await_visible::<Service>(
        store,
        &identity.namespace,
        &identity.service_name,
        RetryPolicy::VISIBILITY,
    )
    .await
    {
        Ok(Visibility::Confirmed) => Visibility::Confirmed,
        Ok(Visibility::TimedOut) => {
            tracing::warn!(
                service = %identity.service_name,
                "Driver service did not become visible in time"
            );
            Visibility::TimedOut
        }
        Err(error) => {
            tracing::warn!(
                service = %identity.service_name,
                error = &error as &dyn std::error::Error,
                "Failed to check whether the driver service is visible"
            );
            Visibility::TimedOut
        }
    };

    tracing::info!(
        run_id = %identity.run_id,
        ?config_map,
        ?driver_pod,
        ?service,
        ?service_visibility,
        "Submitted Spark application"
    );
    Ok(SubmissionReport {
        run_id: identity.run_id.clone(),
        config_map,
        driver_pod,
        service,
        service_visibility,
    })
}

/// The ConfigMap mounted as the driver's Spark configuration directory.
pub fn build_config_map(
    spark_application: &SparkApplication,
    identity: &RunIdentity,
    document: &SubmissionDocument,
) -> Result<ConfigMap> {
    let mut metadata = ObjectMetaBuilder::new();
    metadata
        .name(&identity.config_map_name)
        .namespace(&identity.namespace);
    if spark_application.metadata.uid.is_some() {
        metadata
            .ownerreference_from_resource(spark_application, None, Some(true))
            .context(ObjectMissingMetadataForOwnerRefSnafu)?;
    }

    ConfigMapBuilder::new()
        .metadata(metadata.build())
        .add_data(SPARK_ENV_SH_FILE_NAME, SPARK_ENV_SH_CONTENT)
        .add_data(SPARK_PROPERTIES_FILE_NAME, document.to_string())
        .build()
        .context(InvalidConfigMapSnafu {
            name: &identity.config_map_name,
        })
}

async fn apply<K: store::StoredResource>(
    store: &impl ResourceStore,
    object: &K,
) -> Result<Upserted> {
    let kind = store::kind::<K>();
    let name = object.name_any();
    let upserted = upsert(store, object, RetryPolicy::CONFLICT)
        .await
        .with_context(|_| ApplySnafu {
            kind: kind.clone(),
            name: name.clone(),
        })?;
    tracing::debug!(%kind, %name, ?upserted, "Applied object");
    Ok(upserted)
}
