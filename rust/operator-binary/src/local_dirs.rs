//! Scratch directories of the driver.
//!
//! Spark spills shuffle and cache data to the directories listed in `SPARK_LOCAL_DIRS`. The
//! driver pod needs a volume for each of them. They are taken from the first of these sources
//! that yields anything:
//! 1. volume mounts of the driver named `spark-local-dir-*`
//! 2. `spark.kubernetes.driverEnv.SPARK_LOCAL_DIRS`
//! 3. `spark.local.dir`
//! 4. a single generated directory below `/var/data`
//!
//! Volumes named `spark-local-dir-*` in the application are additionally handed to Spark as
//! volume properties, see [`split_local_dir_volumes`].

use std::collections::BTreeSet;

use stackable_operator::{
    builder::pod::volume::VolumeBuilder,
    k8s_openapi::api::core::v1::{EnvVar, Volume, VolumeMount},
};
use uuid::Uuid;

use crate::crd::{
    SparkApplication, SparkApplicationSpec,
    constants::{
        EMPTY_DIR_MEDIUM_MEMORY, ENV_SPARK_LOCAL_DIRS, LOCAL_DIR_FALLBACK_PATH_PREFIX,
        LOCAL_DIR_NAME_PREFIX,
    },
    roles::SparkApplicationRole,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StorageMedium {
    /// Memory backed `emptyDir`.
    Tmpfs,
    /// Node disk backed `emptyDir`.
    Disk,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalDir {
    pub mount_name: String,
    pub mount_path: String,
    pub medium: StorageMedium,
}

/// The resolved scratch directories and the `SPARK_LOCAL_DIRS` value advertising them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalDirPlan {
    pub dirs: Vec<LocalDir>,
    pub env_value: String,
}

impl LocalDirPlan {
    pub fn volumes(&self) -> Vec<Volume> {
        self.dirs
            .iter()
            .map(|dir| {
                let medium = match dir.medium {
                    StorageMedium::Tmpfs => Some(EMPTY_DIR_MEDIUM_MEMORY),
                    StorageMedium::Disk => None,
                };
                VolumeBuilder::new(&dir.mount_name)
                    .with_empty_dir(medium, None)
                    .build()
            })
            .collect()
    }

    pub fn volume_mounts(&self) -> Vec<VolumeMount> {
        self.dirs
            .iter()
            .map(|dir| VolumeMount {
                name: dir.mount_name.clone(),
                mount_path: dir.mount_path.clone(),
                ..VolumeMount::default()
            })
            .collect()
    }

    pub fn env_var(&self) -> EnvVar {
        EnvVar {
            name: ENV_SPARK_LOCAL_DIRS.to_string(),
            value: Some(self.env_value.clone()),
            ..EnvVar::default()
        }
    }
}

/// Tracks the directories planned so far, so that no path is mounted twice and every generated
/// volume gets a fresh index.
struct PlanBuilder {
    dirs: Vec<LocalDir>,
    mounted_paths: BTreeSet<String>,
    medium: StorageMedium,
}

impl PlanBuilder {
    fn add(&mut self, mount_name: String, mount_path: &str) {
        if self.mounted_paths.insert(mount_path.to_string()) {
            self.dirs.push(LocalDir {
                mount_name,
                mount_path: mount_path.to_string(),
                medium: self.medium,
            });
        }
    }

    fn add_generated(&mut self, paths: &[String]) {
        for path in paths {
            let mount_name = format!("{LOCAL_DIR_NAME_PREFIX}{}", self.dirs.len() + 1);
            self.add(mount_name, path);
        }
    }
}

/// Resolves the scratch directories of the driver.
///
/// `pre_declared` are the volume mounts declared on the driver container. Apart from the
/// fallback, which generates a new path every time, the result only depends on the inputs.
pub fn resolve(spark_application: &SparkApplication, pre_declared: &[VolumeMount]) -> LocalDirPlan {
    let medium = if spark_application.local_dirs_on_tmpfs() {
        StorageMedium::Tmpfs
    } else {
        StorageMedium::Disk
    };
    let mut plan = PlanBuilder {
        dirs: Vec::new(),
        mounted_paths: BTreeSet::new(),
        medium,
    };

    for mount in pre_declared
        .iter()
        .filter(|mount| mount.name.starts_with(LOCAL_DIR_NAME_PREFIX))
    {
        plan.add(mount.name.clone(), &mount.mount_path);
    }

    if plan.dirs.is_empty() {
        let env_dirs = spark_application.driver_env_local_dirs();
        if env_dirs.is_empty() {
            plan.add_generated(&spark_application.spark_local_dirs());
        } else {
            plan.add_generated(&env_dirs);
        }
    }

    if plan.dirs.is_empty() {
        let path = format!("{LOCAL_DIR_FALLBACK_PATH_PREFIX}{}", Uuid::new_v4());
        tracing::debug!(%path, "No local directories requested, using a generated one");
        return LocalDirPlan {
            dirs: vec![LocalDir {
                mount_name: format!("{LOCAL_DIR_NAME_PREFIX}1"),
                mount_path: path.clone(),
                medium: StorageMedium::Tmpfs,
            }],
            env_value: path,
        };
    }

    let env_value = plan
        .dirs
        .iter()
        .map(|dir| dir.mount_path.as_str())
        .collect::<Vec<_>>()
        .join(",");
    LocalDirPlan {
        dirs: plan.dirs,
        env_value,
    }
}

/// An application spec with its `spark-local-dir-*` volumes moved into Spark properties.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalDirVolumeSplit {
    /// The spec without local-dir volumes and without mounts referencing them.
    pub spec: SparkApplicationSpec,
    /// `spark.kubernetes.<role>.volumes.*` properties for the removed mounts.
    pub conf_options: Vec<String>,
}

/// Removes the `spark-local-dir-*` volumes from the spec and turns every driver and executor
/// mount of them into the volume properties Spark uses to recreate them.
pub fn split_local_dir_volumes(spec: &SparkApplicationSpec) -> LocalDirVolumeSplit {
    let mut spec = spec.clone();
    let (local_volumes, volumes): (Vec<_>, Vec<_>) = spec
        .volumes
        .drain(..)
        .partition(|volume| volume.name.starts_with(LOCAL_DIR_NAME_PREFIX));
    spec.volumes = volumes;

    let mut conf_options = Vec::new();
    for (role, mounts) in [
        (SparkApplicationRole::Driver, &mut spec.driver.pod.volume_mounts),
        (SparkApplicationRole::Executor, &mut spec.executor.pod.volume_mounts),
    ] {
        mounts.retain(|mount| {
            match local_volumes.iter().find(|volume| volume.name == mount.name) {
                Some(volume) => {
                    conf_options.extend(volume_options(role, volume, mount));
                    false
                }
                None => true,
            }
        });
    }

    LocalDirVolumeSplit { spec, conf_options }
}

fn volume_options(role: SparkApplicationRole, volume: &Volume, mount: &VolumeMount) -> Vec<String> {
    let prefix = role.keys().volumes_prefix;
    let name = &volume.name;
    let mount_path = |kind: &str| format!("{prefix}{kind}.{name}.mount.path={}", mount.mount_path);
    let option =
        |kind: &str, key: &str, value: &str| format!("{prefix}{kind}.{name}.options.{key}={value}");

    if let Some(host_path) = &volume.host_path {
        let mut options = vec![
            mount_path("hostPath"),
            option("hostPath", "path", &host_path.path),
        ];
        if let Some(type_) = &host_path.type_ {
            options.push(option("hostPath", "type", type_));
        }
        options
    } else if volume.empty_dir.is_some() {
        vec![mount_path("emptyDir")]
    } else if let Some(claim) = &volume.persistent_volume_claim {
        vec![
            mount_path("persistentVolumeClaim"),
            option("persistentVolumeClaim", "claimName", &claim.claim_name),
        ]
    } else {
        Vec::new()
    }
}
