//! The driver pod, started directly instead of through `spark-submit`.

use std::collections::BTreeMap;

use snafu::{ResultExt, Snafu};
use stackable_operator::{
    builder::{
        self,
        meta::ObjectMetaBuilder,
        pod::{PodBuilder, container::ContainerBuilder, volume::VolumeBuilder},
    },
    k8s_openapi::api::core::v1::{
        Capabilities, ConfigMapVolumeSource, ContainerPort, EnvVar, EnvVarSource,
        KeyToPath, LocalObjectReference, ObjectFieldSelector, Pod, PodSecurityContext,
        SecretVolumeSource, SecurityContext, Toleration, Volume, VolumeMount,
    },
    kube::ResourceExt,
};

use crate::{
    crd::{SparkApplication, constants::*, roles::SparkApplicationRole},
    local_dirs::{self, LocalDirVolumeSplit},
    resources,
    submit::{RunIdentity, SubmitEnvironment},
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to resolve the driver resources"))]
    ResolveResources { source: resources::Error },

    #[snafu(display("illegal container name"))]
    IllegalContainerName {
        source: builder::pod::container::Error,
    },

    #[snafu(display("failed to add needed volume"))]
    AddVolume { source: builder::pod::Error },

    #[snafu(display("failed to add needed volumeMount"))]
    AddVolumeMount {
        source: builder::pod::container::Error,
    },

    #[snafu(display("object is missing metadata to build owner reference"))]
    ObjectMissingMetadataForOwnerRef {
        source: stackable_operator::builder::meta::Error,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Labels of the driver pod, also used by the driver Service to select it.
///
/// Application labels take precedence over driver labels, which take precedence over the
/// labels set here.
pub fn driver_pod_labels(
    spark_application: &SparkApplication,
    identity: &RunIdentity,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (LABEL_APP_NAME.to_string(), identity.app_name.clone()),
        (LABEL_SPARK_APP_NAME.to_string(), identity.app_name.clone()),
        (LABEL_SPARK_APP_SELECTOR.to_string(), identity.run_id.clone()),
        (
            LABEL_SPARK_ROLE.to_string(),
            SparkApplicationRole::Driver.to_string(),
        ),
        (LABEL_SUBMISSION_ID.to_string(), identity.submission_id.clone()),
        (
            LABEL_LAUNCHED_BY_SPARK_OPERATOR.to_string(),
            "true".to_string(),
        ),
    ]);
    labels.extend(spark_application.spec.driver.pod.labels.clone());
    labels.extend(spark_application.labels().clone());
    labels
}

/// Builds the driver pod of one run.
///
/// `split` is the application spec without its `spark-local-dir-*` volumes. The scratch
/// directories are resolved from the driver mounts of the unmodified spec instead.
pub fn build_driver_pod(
    spark_application: &SparkApplication,
    split: &LocalDirVolumeSplit,
    identity: &RunIdentity,
    environment: &SubmitEnvironment,
) -> Result<Pod> {
    let driver = &spark_application.spec.driver.pod;
    let spark_conf = &spark_application.spec.spark_conf;

    let local_dir_plan = local_dirs::resolve(spark_application, &driver.volume_mounts);
    let mut volumes = VolumeSet::default();
    let mut volume_mounts = vec![VolumeMount {
        name: VOLUME_NAME_SPARK_CONF.to_string(),
        mount_path: VOLUME_MOUNT_PATH_SPARK_CONF.to_string(),
        ..VolumeMount::default()
    }];
    volumes.add(spark_conf_volume(&identity.config_map_name));

    volumes.extend(local_dir_plan.volumes());
    volume_mounts.extend(local_dir_plan.volume_mounts());

    if spark_conf.contains_key(KERBEROS_KRB5_PATH)
        || spark_conf.contains_key(KERBEROS_KRB5_CONFIG_MAP_NAME)
    {
        let config_map_name = spark_conf
            .get(KERBEROS_KRB5_CONFIG_MAP_NAME)
            .cloned()
            .unwrap_or_else(|| format!("{}-{VOLUME_NAME_KRB5_FILE}", identity.app_name));
        volumes.add(
            VolumeBuilder::new(VOLUME_NAME_KRB5_FILE)
                .with_config_map(config_map_name)
                .build(),
        );
        volume_mounts.push(VolumeMount {
            name: VOLUME_NAME_KRB5_FILE.to_string(),
            mount_path: KRB5_FILE_MOUNT_PATH.to_string(),
            sub_path: Some(KRB5_FILE_NAME.to_string()),
            ..VolumeMount::default()
        });
    }

    if [
        AUTHENTICATE_DRIVER_OAUTH_TOKEN_FILE,
        AUTHENTICATE_DRIVER_CLIENT_KEY_FILE,
        AUTHENTICATE_DRIVER_CLIENT_CERT_FILE,
        AUTHENTICATE_DRIVER_CA_CERT_FILE,
    ]
    .iter()
    .any(|key| spark_conf.contains_key(*key))
    {
        volumes.add(secret_volume(
            VOLUME_NAME_KUBERNETES_CREDENTIALS,
            format!(
                "{}-{VOLUME_NAME_KUBERNETES_CREDENTIALS}",
                identity.driver_pod_name
            ),
        ));
        volume_mounts.push(VolumeMount {
            name: VOLUME_NAME_KUBERNETES_CREDENTIALS.to_string(),
            mount_path: KUBERNETES_CREDENTIALS_MOUNT_PATH.to_string(),
            ..VolumeMount::default()
        });
    }

    if let Some(token_secret) = spark_conf.get(KERBEROS_TOKEN_SECRET_NAME) {
        volumes.add(secret_volume(VOLUME_NAME_HADOOP_TOKEN, token_secret));
        volume_mounts.push(VolumeMount {
            name: VOLUME_NAME_HADOOP_TOKEN.to_string(),
            mount_path: HADOOP_TOKEN_MOUNT_PATH.to_string(),
            ..VolumeMount::default()
        });
    }

    for secret in &driver.secrets {
        let volume_name = format!("{}{SECRET_VOLUME_SUFFIX}", secret.name);
        volumes.add(secret_volume(&volume_name, &secret.name));
        volume_mounts.push(VolumeMount {
            name: volume_name,
            mount_path: secret.path.clone(),
            ..VolumeMount::default()
        });
    }

    volumes.extend(split.spec.volumes.iter().cloned());

    let config_map_mounts = driver
        .config_maps
        .iter()
        .map(|config_map| {
            let volume_name = format!("{}{CONFIG_MAP_VOLUME_SUFFIX}", config_map.name);
            volumes.add(
                VolumeBuilder::new(&volume_name)
                    .with_config_map(&config_map.name)
                    .build(),
            );
            VolumeMount {
                name: volume_name,
                mount_path: config_map.path.clone(),
                ..VolumeMount::default()
            }
        })
        .collect::<Vec<_>>();
    volume_mounts.extend(config_map_mounts.iter().cloned());

    // Declared driver mounts only survive if the pod actually has their volume.
    volume_mounts.extend(
        split
            .spec
            .driver
            .pod
            .volume_mounts
            .iter()
            .filter(|mount| volumes.contains(&mount.name))
            .cloned(),
    );

    let mut env = driver_env(spark_application, identity, environment);
    env.push(local_dir_plan.env_var());

    let resources = resources::resolve(spark_application).context(ResolveResourcesSnafu)?;

    let mut cb =
        ContainerBuilder::new(CONTAINER_NAME_DRIVER).context(IllegalContainerNameSnafu)?;
    cb.args(driver_args(spark_application))
        .add_env_vars(env)
        .add_volume_mounts(volume_mounts)
        .context(AddVolumeMountSnafu)?
        .resources(resources.into())
        .image_pull_policy(
            spark_application
                .spec
                .image_pull_policy
                .as_deref()
                .unwrap_or(DEFAULT_IMAGE_PULL_POLICY),
        );
    if let Some(image) = driver.image.as_ref().or(spark_application.spec.image.as_ref()) {
        cb.image(image);
    }

    let mut container = cb.build();
    container.ports = Some(driver_ports());
    container.security_context = Some(SecurityContext {
        capabilities: Some(Capabilities {
            drop: Some(vec![CAPABILITY_ALL.to_string()]),
            ..Capabilities::default()
        }),
        privileged: Some(false),
        ..SecurityContext::default()
    });
    container.termination_message_path = Some(TERMINATION_MESSAGE_PATH.to_string());
    container.termination_message_policy = Some(TERMINATION_MESSAGE_POLICY.to_string());

    let mut metadata = ObjectMetaBuilder::new();
    metadata
        .name(&identity.driver_pod_name)
        .namespace(&identity.namespace);
    if spark_application.metadata.uid.is_some() {
        metadata
            .ownerreference_from_resource(spark_application, None, Some(true))
            .context(ObjectMissingMetadataForOwnerRefSnafu)?;
    }
    let mut metadata = metadata.build();
    metadata.labels = Some(driver_pod_labels(spark_application, identity));
    if !driver.annotations.is_empty() {
        metadata.annotations = Some(driver.annotations.clone());
    }

    let sidecars = driver
        .sidecars
        .iter()
        .map(|sidecar| {
            let mut sidecar = sidecar.clone();
            let mounts = config_map_mounts
                .iter()
                .cloned()
                .chain(
                    sidecar
                        .volume_mounts
                        .take()
                        .unwrap_or_default()
                        .into_iter()
                        .filter(|mount| volumes.contains(&mount.name)),
                )
                .collect::<Vec<_>>();
            sidecar.volume_mounts = (!mounts.is_empty()).then_some(mounts);
            sidecar
        })
        .collect::<Vec<_>>();

    let mut pb = PodBuilder::new();
    pb.metadata(metadata)
        .add_container(container)
        .add_volumes(volumes.into_inner())
        .context(AddVolumeSnafu)?;
    if let Some(security_context) = pod_security_context(spark_application) {
        pb.security_context(security_context);
    }
    if let Some(service_account) = &driver.service_account {
        pb.service_account_name(service_account);
    }
    for sidecar in sidecars {
        pb.add_container(sidecar);
    }
    for init_container in &driver.init_containers {
        pb.add_init_container(init_container.clone());
    }

    let template = pb.build_template();
    let mut spec = template.spec.unwrap_or_default();
    spec.dns_policy = Some(DNS_POLICY.to_string());
    spec.enable_service_links = Some(true);
    spec.node_selector = driver.node_selector.clone();
    spec.restart_policy = Some(RESTART_POLICY_NEVER.to_string());
    spec.termination_grace_period_seconds = Some(
        driver
            .termination_grace_period_seconds
            .unwrap_or(DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS),
    );
    spec.tolerations = Some(
        driver
            .tolerations
            .clone()
            .unwrap_or_else(default_tolerations),
    );
    if !spark_application.spec.image_pull_secrets.is_empty() {
        spec.image_pull_secrets = Some(
            spark_application
                .spec
                .image_pull_secrets
                .iter()
                .map(|name| LocalObjectReference { name: name.clone() })
                .collect(),
        );
    }

    Ok(Pod {
        metadata: template.metadata.unwrap_or_default(),
        spec: Some(spec),
        status: None,
    })
}

/// Pod volumes by name. The first volume added under a name is kept.
#[derive(Default)]
struct VolumeSet {
    volumes: Vec<Volume>,
}

impl VolumeSet {
    fn add(&mut self, volume: Volume) {
        if !self.contains(&volume.name) {
            self.volumes.push(volume);
        }
    }

    fn extend(&mut self, volumes: impl IntoIterator<Item = Volume>) {
        for volume in volumes {
            self.add(volume);
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.volumes.iter().any(|volume| volume.name == name)
    }

    fn into_inner(self) -> Vec<Volume> {
        self.volumes
    }
}

/// `driver --properties-file <file> [--class <main class>] [<main file>] [<arguments>...]`
fn driver_args(spark_application: &SparkApplication) -> Vec<String> {
    let spec = &spark_application.spec;
    let mut args = vec![
        DRIVER_ARG.to_string(),
        DRIVER_ARG_PROPERTIES_FILE.to_string(),
        SPARK_PROPERTIES_FILE_PATH.to_string(),
    ];
    if let Some(main_class) = &spec.main_class {
        args.push(DRIVER_ARG_CLASS.to_string());
        args.push(main_class.clone());
    }
    args.extend(spec.main_application_file.clone());
    args.extend(spec.arguments.iter().cloned());
    args
}

fn driver_env(
    spark_application: &SparkApplication,
    identity: &RunIdentity,
    environment: &SubmitEnvironment,
) -> Vec<EnvVar> {
    let mut env = vec![
        env_var(ENV_SPARK_USER, &environment.spark_user),
        env_var(ENV_SPARK_APPLICATION_ID, &identity.run_id),
        EnvVar {
            name: ENV_SPARK_DRIVER_BIND_ADDRESS.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    api_version: Some("v1".to_string()),
                    field_path: POD_IP_FIELD_PATH.to_string(),
                }),
                ..EnvVarSource::default()
            }),
            ..EnvVar::default()
        },
    ];

    // SPARK_LOCAL_DIRS is advertised by the local directory plan instead.
    env.extend(
        spark_application
            .driver_env()
            .filter(|(name, _)| *name != ENV_SPARK_LOCAL_DIRS)
            .map(|(name, value)| env_var(name, value)),
    );
    env.extend(
        spark_application
            .spec
            .driver
            .pod
            .env_vars
            .iter()
            .map(|(name, value)| env_var(name, value)),
    );
    if let Some(item_key) = spark_application
        .spec
        .spark_conf
        .get(KERBEROS_TOKEN_SECRET_ITEM_KEY)
    {
        env.push(env_var(
            ENV_HADOOP_TOKEN_FILE_LOCATION,
            format!("{HADOOP_TOKEN_MOUNT_PATH}/{item_key}"),
        ));
    }
    env.push(env_var(ENV_SPARK_CONF_DIR, VOLUME_MOUNT_PATH_SPARK_CONF));
    env
}

fn env_var(name: impl Into<String>, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        ..EnvVar::default()
    }
}

fn driver_ports() -> Vec<ContainerPort> {
    [
        (DRIVER_PORT_NAME, DRIVER_PORT),
        (BLOCK_MANAGER_PORT_NAME, BLOCK_MANAGER_PORT),
        (UI_PORT_NAME, UI_PORT),
    ]
    .into_iter()
    .map(|(name, port)| ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some(PORT_PROTOCOL.to_string()),
        ..ContainerPort::default()
    })
    .collect()
}

/// Projects `spark-env.sh` and `spark.properties` of the run's ConfigMap.
fn spark_conf_volume(config_map_name: &str) -> Volume {
    let item = |file_name: &str| KeyToPath {
        key: file_name.to_string(),
        path: file_name.to_string(),
        mode: Some(CONFIG_FILE_MODE),
    };
    Volume {
        name: VOLUME_NAME_SPARK_CONF.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map_name.to_string(),
            default_mode: Some(CONFIG_FILE_MODE),
            items: Some(vec![
                item(SPARK_ENV_SH_FILE_NAME),
                item(SPARK_PROPERTIES_FILE_NAME),
            ]),
            ..ConfigMapVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn secret_volume(name: &str, secret_name: impl Into<String>) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.into()),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    }
}

/// The driver's own `runAsUser` and `runAsNonRoot`, or a non-root default.
///
/// A driver security context setting neither leaves the pod without one.
fn pod_security_context(spark_application: &SparkApplication) -> Option<PodSecurityContext> {
    match &spark_application.spec.driver.pod.security_context {
        Some(security_context) => {
            if security_context.run_as_user.is_none() && security_context.run_as_non_root.is_none()
            {
                return None;
            }
            let run_as_user = security_context.run_as_user;
            Some(PodSecurityContext {
                run_as_user,
                fs_group: run_as_user,
                supplemental_groups: run_as_user.map(|id| vec![id]),
                run_as_non_root: security_context.run_as_non_root,
                ..PodSecurityContext::default()
            })
        }
        None => Some(PodSecurityContext {
            run_as_user: Some(DEFAULT_RUN_AS_ID),
            fs_group: Some(DEFAULT_RUN_AS_ID),
            supplemental_groups: Some(vec![DEFAULT_RUN_AS_ID]),
            run_as_non_root: Some(true),
            ..PodSecurityContext::default()
        }),
    }
}

fn default_tolerations() -> Vec<Toleration> {
    [TAINT_NODE_NOT_READY, TAINT_NODE_UNREACHABLE]
        .into_iter()
        .map(|key| Toleration {
            effect: Some(TOLERATION_EFFECT.to_string()),
            key: Some(key.to_string()),
            operator: Some(TOLERATION_OPERATOR.to_string()),
            toleration_seconds: Some(DEFAULT_TOLERATION_SECONDS),
            ..Toleration::default()
        })
        .collect()
}
