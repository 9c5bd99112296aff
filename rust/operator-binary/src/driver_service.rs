use std::collections::BTreeMap;

use snafu::{ResultExt, Snafu};
use stackable_operator::{
    builder::meta::ObjectMetaBuilder,
    k8s_openapi::{
        api::core::v1::{Service, ServicePort, ServiceSpec},
        apimachinery::pkg::util::intstr::IntOrString,
    },
};

use crate::{
    crd::{SparkApplication, constants::*},
    submit::RunIdentity,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("object is missing metadata to build owner reference"))]
    ObjectMissingMetadataForOwnerRef {
        source: stackable_operator::builder::meta::Error,
    },
}

/// The headless [`Service`] executors use to reach the driver pod.
///
/// `selector` has to be the label set of the driver pod.
pub fn build_driver_service(
    spark_application: &SparkApplication,
    identity: &RunIdentity,
    selector: BTreeMap<String, String>,
) -> Result<Service, Error> {
    let mut metadata = ObjectMetaBuilder::new();
    metadata
        .name(&identity.service_name)
        .namespace(&identity.namespace);
    if spark_application.metadata.uid.is_some() {
        metadata
            .ownerreference_from_resource(spark_application, None, Some(true))
            .context(ObjectMissingMetadataForOwnerRefSnafu)?;
    }
    let mut metadata = metadata.build();
    metadata.labels = Some(BTreeMap::from([(
        LABEL_SPARK_APP_SELECTOR.to_string(),
        identity.run_id.clone(),
    )]));
    let annotations = &spark_application.spec.driver.pod.annotations;
    if !annotations.is_empty() {
        metadata.annotations = Some(annotations.clone());
    }

    Ok(Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some(SERVICE_TYPE_CLUSTER_IP.to_string()),
            cluster_ip: Some(NONE.to_string()),
            ports: Some(driver_ports()),
            selector: Some(selector),
            session_affinity: Some(NONE.to_string()),
            ..ServiceSpec::default()
        }),
        status: None,
    })
}

fn driver_ports() -> Vec<ServicePort> {
    [
        (DRIVER_PORT_NAME, DRIVER_PORT),
        (BLOCK_MANAGER_PORT_NAME, BLOCK_MANAGER_PORT),
        (UI_PORT_NAME, UI_PORT),
    ]
    .into_iter()
    .map(|(name, port)| ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some(PORT_PROTOCOL.to_string()),
        ..ServicePort::default()
    })
    .collect()
}
