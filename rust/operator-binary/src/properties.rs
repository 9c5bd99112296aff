//! The `spark.properties` file the driver reads its whole configuration from.
//!
//! The file is written line by line in a fixed order: structured fields of the application
//! first, then the free form `sparkConf` and `hadoopConf` maps, then anything from the local
//! `spark-defaults.conf` that is not set yet, and finally the application artifact and its
//! arguments. Maps are always written sorted by key.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display},
    fs::File,
    io::{BufReader, ErrorKind},
    path::Path,
};

use chrono::{DateTime, Utc};
use snafu::{ResultExt, Snafu, ensure};
use stackable_operator::kube::ResourceExt;

use crate::{
    crd::{
        SecretType, SparkApplication,
        constants::*,
        memory,
        roles::SparkApplicationRole,
    },
    submit::{RunIdentity, SubmitEnvironment},
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display(
        "failed to resolve the Kubernetes API server from host {host:?} and port {port:?}"
    ))]
    ResolveMasterUrl { host: String, port: String },

    #[snafu(display("invalid {role} memory {memory:?}"))]
    RoleMemory {
        source: memory::Error,
        role: SparkApplicationRole,
        memory: String,
    },

    #[snafu(display("invalid {role} memory overhead factor {factor:?}"))]
    RoleMemoryOverheadFactor {
        source: std::num::ParseFloatError,
        role: SparkApplicationRole,
        factor: String,
    },

    #[snafu(display("{role} memory overhead factor {factor:?} is negative or not finite"))]
    RoleMemoryOverheadFactorOutOfRange {
        role: SparkApplicationRole,
        factor: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Ordered `key=value` lines, plus the raw argument lines at the end.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SubmissionDocument {
    lines: Vec<String>,
    keys: BTreeSet<String>,
}

impl SubmissionDocument {
    fn property(&mut self, key: impl Into<String>, value: impl Display) {
        let key = key.into();
        self.lines.push(format!("{key}={value}"));
        self.keys.insert(key);
    }

    fn properties<'a>(
        &mut self,
        prefix: &str,
        entries: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) {
        for (key, value) in entries {
            self.property(format!("{prefix}{key}"), value);
        }
    }

    fn raw(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    fn contains_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The value of the last line setting `key`, which is the one Spark ends up with.
    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines
            .iter()
            .rev()
            .find_map(|line| line.strip_prefix(key)?.strip_prefix('='))
    }
}

impl Display for SubmissionDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.lines.iter().try_for_each(|line| writeln!(f, "{line}"))
    }
}

/// Escapes the separators of the properties format, `:` and `=`.
pub fn escape(value: &str) -> String {
    value.replace(':', "\\:").replace('=', "\\=")
}

/// The Spark master URL of the Kubernetes API server, e.g. `k8s://https://10.0.0.1:443`.
pub fn master_url(environment: &SubmitEnvironment) -> Result<String> {
    let host = environment.kubernetes_service_host.trim();
    let port = environment.kubernetes_service_port.trim();
    match port.parse::<u16>() {
        Ok(port) if !host.is_empty() && port > 0 => Ok(format!("k8s://https://{host}:{port}")),
        _ => ResolveMasterUrlSnafu {
            host: &environment.kubernetes_service_host,
            port: &environment.kubernetes_service_port,
        }
        .fail(),
    }
}

/// Builds the properties document of one submission.
///
/// `local_dir_options` are the volume properties of the application's `spark-local-dir-*`
/// volumes, see [`crate::local_dirs::split_local_dir_volumes`].
pub fn build(
    spark_application: &SparkApplication,
    identity: &RunIdentity,
    environment: &SubmitEnvironment,
    local_dir_options: &[String],
    submitted_at: DateTime<Utc>,
) -> Result<SubmissionDocument> {
    let spec = &spark_application.spec;
    let namespace = &identity.namespace;
    let app_name = &identity.app_name;
    let mut doc = SubmissionDocument::default();

    doc.property(
        SPARK_DRIVER_HOST,
        format!("{}.{namespace}.svc", identity.service_name),
    );
    doc.property(SPARK_APP_ID, &identity.run_id);
    doc.property(SPARK_MASTER, escape(&master_url(environment)?));
    doc.property(SPARK_SUBMIT_DEPLOY_MODE, &spec.mode);
    doc.property(SPARK_KUBERNETES_NAMESPACE, namespace);
    doc.property(SPARK_APP_NAME, app_name);
    doc.property(SPARK_DRIVER_POD_NAME, &identity.driver_pod_name);
    for role in [SparkApplicationRole::Driver, SparkApplicationRole::Executor] {
        let label_prefix = role.keys().label_prefix;
        doc.property(format!("{label_prefix}{LABEL_APP_NAME}"), app_name);
        doc.property(
            format!("{label_prefix}{LABEL_LAUNCHED_BY_SPARK_OPERATOR}"),
            "true",
        );
        doc.property(
            format!("{label_prefix}{LABEL_SUBMISSION_ID}"),
            &identity.submission_id,
        );
    }

    let deps = &spec.deps;
    if spec.main_application_file.is_none() && !deps.jars.is_empty() {
        doc.property(SPARK_JARS, escaped_list(&deps.jars));
    }
    for (key, list) in [
        (SPARK_ARCHIVES, &deps.archives),
        (SPARK_FILES, &deps.files),
        (SPARK_PY_FILES, &deps.py_files),
        (SPARK_JARS_PACKAGES, &deps.packages),
        (SPARK_JARS_EXCLUDES, &deps.exclude_packages),
        (SPARK_JARS_REPOSITORIES, &deps.repositories),
    ] {
        if !list.is_empty() {
            doc.property(key, list.join(","));
        }
    }

    if let Some(image) = &spec.image {
        doc.property(SPARK_CONTAINER_IMAGE, escape(image));
    }
    if let Some(pull_policy) = &spec.image_pull_policy {
        doc.property(SPARK_CONTAINER_IMAGE_PULL_POLICY, pull_policy);
    }
    if !spec.image_pull_secrets.is_empty() {
        doc.property(
            SPARK_CONTAINER_IMAGE_PULL_SECRETS,
            spec.image_pull_secrets.join(","),
        );
    }
    if let Some(python_version) = &spec.python_version {
        doc.property(SPARK_PYTHON_VERSION, python_version);
    }
    doc.property(
        SPARK_MEMORY_OVERHEAD_FACTOR,
        spec.memory_overhead_factor
            .as_deref()
            .unwrap_or(DEFAULT_MEMORY_OVERHEAD_FACTOR),
    );
    // The driver is started directly, there is no spark-submit process that could wait.
    doc.property(SPARK_WAIT_APP_COMPLETION, "false");
    for role in [SparkApplicationRole::Driver, SparkApplicationRole::Executor] {
        if let Some(image) = &spark_application.pod_spec(role).image {
            doc.property(role.keys().container_image, escape(image));
        }
    }

    driver_settings(&mut doc, spark_application)?;
    executor_settings(&mut doc, spark_application)?;
    for role in [SparkApplicationRole::Driver, SparkApplicationRole::Executor] {
        role_metadata(&mut doc, spark_application, role);
    }

    if let Some(dynamic_allocation) = spec
        .dynamic_allocation
        .as_ref()
        .filter(|dynamic_allocation| dynamic_allocation.enabled)
    {
        doc.property(SPARK_DYNAMIC_ALLOCATION_ENABLED, true);
        doc.property(SPARK_DYNAMIC_ALLOCATION_SHUFFLE_TRACKING_ENABLED, true);
        if let Some(initial) = dynamic_allocation.initial_executors {
            doc.property(SPARK_DYNAMIC_ALLOCATION_INITIAL_EXECUTORS, initial);
        }
        if let Some(min) = dynamic_allocation.min_executors {
            doc.property(SPARK_DYNAMIC_ALLOCATION_MIN_EXECUTORS, min);
        }
        if let Some(max) = dynamic_allocation.max_executors {
            doc.property(SPARK_DYNAMIC_ALLOCATION_MAX_EXECUTORS, max);
        }
        if let Some(timeout) = dynamic_allocation.shuffle_tracking_timeout {
            doc.property(SPARK_DYNAMIC_ALLOCATION_SHUFFLE_TRACKING_TIMEOUT, timeout);
        }
    }

    doc.properties(SPARK_NODE_SELECTOR_PREFIX, &spec.node_selector);

    doc.property(SPARK_SUBMIT_IN_DRIVER, true);
    doc.property(SPARK_DRIVER_BLOCK_MANAGER_PORT, BLOCK_MANAGER_PORT);
    doc.property(SPARK_DRIVER_PORT, DRIVER_PORT);

    let resource_type = spark_application.resource_type();
    if !resource_type.is_empty() {
        doc.property(SPARK_RESOURCE_TYPE, resource_type);
    }
    doc.property(SPARK_APP_SUBMIT_TIME, submitted_at.timestamp_millis());
    doc.property(
        SPARK_UI_PROXY_BASE,
        format!("/{namespace}-{app_name}{SPARK_UI_PROXY_BASE_PATTERN}"),
    );
    doc.property(SPARK_UI_PROXY_REDIRECT_URI, "/");

    if let Some(monitoring) = &spec.monitoring {
        doc.property(SPARK_METRICS_NAMESPACE, format!("{namespace}.{app_name}"));
        if let Some(metrics_properties_file) = &monitoring.metrics_properties_file {
            doc.property(SPARK_METRICS_CONF, metrics_properties_file);
        }
    }

    for option in local_dir_options {
        doc.raw(option.as_str());
    }

    for (key, value) in &spec.spark_conf {
        match key.as_str() {
            SPARK_DRIVER_POD_NAME => {}
            SPARK_DRIVER_EXTRA_CLASS_PATH | SPARK_EXECUTOR_EXTRA_CLASS_PATH => {
                doc.property(key, escape(value))
            }
            _ => doc.property(key, value),
        }
    }
    if let Some(hadoop_conf) = &spec.hadoop_conf {
        doc.properties(SPARK_HADOOP_PREFIX, hadoop_conf);
    }
    if spec.hadoop_conf.is_some() || spec.hadoop_config_map.is_some() {
        doc.property(
            format!("{SPARK_HADOOP_PREFIX}{ENV_HADOOP_CONF_DIR}"),
            HADOOP_CONF_DIR_PATH,
        );
    }

    for (key, value) in read_defaults_file(&environment.defaults_file) {
        if !doc.contains_key(&key) {
            doc.property(key, value);
        }
    }

    if let Some(main_application_file) = &spec.main_application_file {
        let jars = std::iter::once(main_application_file)
            .chain(&deps.jars)
            .cloned()
            .collect::<Vec<_>>();
        doc.property(SPARK_JARS, escaped_list(&jars));
    }

    for argument in &spec.arguments {
        doc.raw(argument.as_str());
    }

    Ok(doc)
}

fn driver_settings(doc: &mut SubmissionDocument, spark_application: &SparkApplication) -> Result<()> {
    let role = SparkApplicationRole::Driver;
    let keys = role.keys();
    let driver = &spark_application.spec.driver;

    match driver.pod.cores {
        Some(cores) => doc.property(keys.cores, cores),
        None => doc.property(keys.cores, DEFAULT_CORES),
    }
    cpu_settings(doc, spark_application, role);
    let memory = driver.pod.memory.as_deref().unwrap_or(DEFAULT_DRIVER_MEMORY);
    doc.property(keys.memory, memory);
    doc.property(
        keys.memory_overhead,
        document_memory_overhead(
            role,
            memory,
            driver.pod.memory_overhead.as_deref(),
            DRIVER_DOCUMENT_OVERHEAD_FACTOR,
        )?,
    );
    if let Some(service_account) = &driver.pod.service_account {
        doc.property(keys.service_account_name, service_account);
    }
    if let Some(java_options) = &driver.pod.java_options {
        doc.property(keys.extra_java_options, escape(java_options));
    }
    if let Some(kubernetes_master) = &driver.kubernetes_master {
        doc.property(SPARK_DRIVER_KUBERNETES_MASTER, kubernetes_master);
    }
    Ok(())
}

fn executor_settings(
    doc: &mut SubmissionDocument,
    spark_application: &SparkApplication,
) -> Result<()> {
    let role = SparkApplicationRole::Executor;
    let keys = role.keys();
    let executor = &spark_application.spec.executor;

    if let Some(instances) = executor.instances {
        doc.property(SPARK_EXECUTOR_INSTANCES, instances);
    }
    if let Some(cores) = executor.pod.cores {
        doc.property(keys.cores, cores);
    }
    cpu_settings(doc, spark_application, role);
    let memory = executor
        .pod
        .memory
        .as_deref()
        .unwrap_or(DEFAULT_EXECUTOR_MEMORY);
    doc.property(keys.memory, memory);
    let default_factor = if spark_application.is_jvm() {
        JVM_OVERHEAD_FACTOR
    } else {
        NON_JVM_OVERHEAD_FACTOR
    };
    doc.property(
        keys.memory_overhead,
        document_memory_overhead(
            role,
            memory,
            executor.pod.memory_overhead.as_deref(),
            default_factor,
        )?,
    );
    if let Some(service_account) = &executor.pod.service_account {
        doc.property(keys.service_account_name, service_account);
    }
    if let Some(delete_on_termination) = executor.delete_on_termination {
        doc.property(SPARK_EXECUTOR_DELETE_ON_TERMINATION, delete_on_termination);
    }
    if let Some(java_options) = &executor.pod.java_options {
        doc.property(keys.extra_java_options, java_options);
    }
    Ok(())
}

fn cpu_settings(
    doc: &mut SubmissionDocument,
    spark_application: &SparkApplication,
    role: SparkApplicationRole,
) {
    let pod = spark_application.pod_spec(role);
    if let Some(core_request) = &pod.core_request {
        doc.property(role.keys().request_cores, core_request);
    }
    if let Some(core_limit) = &pod.core_limit {
        doc.property(role.keys().limit_cores, core_limit);
    }
}

/// Overhead policy of the properties document.
///
/// An overhead given as a bare number is a factor of the role memory, anything else is a
/// quantity that is passed on unchanged. Without overhead `default_factor` applies. Unlike the
/// driver container there is no lower bound, Spark applies its own.
fn document_memory_overhead(
    role: SparkApplicationRole,
    memory: &str,
    overhead: Option<&str>,
    default_factor: f64,
) -> Result<String> {
    let factor = match overhead.map(str::trim) {
        Some(overhead) if overhead.parse::<f64>().is_err() => return Ok(overhead.to_string()),
        Some(factor_value) => {
            let factor = factor_value
                .parse::<f64>()
                .context(RoleMemoryOverheadFactorSnafu {
                    role,
                    factor: factor_value,
                })?;
            ensure!(
                factor.is_finite() && factor >= 0.0,
                RoleMemoryOverheadFactorOutOfRangeSnafu {
                    role,
                    factor: factor_value,
                }
            );
            factor
        }
        None => default_factor,
    };
    let memory_mib = memory::to_mib(memory).context(RoleMemorySnafu { role, memory })?;
    Ok(format!("{}m", (memory_mib as f64 * factor).floor() as u64))
}

fn role_metadata(
    doc: &mut SubmissionDocument,
    spark_application: &SparkApplication,
    role: SparkApplicationRole,
) {
    let keys = role.keys();
    let pod = spark_application.pod_spec(role);

    let mut labels = spark_application.labels().clone();
    labels.extend(pod.labels.clone());
    doc.properties(keys.label_prefix, &labels);

    for (key, value) in &pod.annotations {
        let property = format!("{}{key}", keys.annotation_prefix);
        if key == ANNOTATION_PROMETHEUS_TARGETS {
            doc.property(property, escape(&value.replace('\n', "")));
        } else {
            doc.property(property, value);
        }
    }

    for (env, secret) in &pod.env_secret_key_refs {
        doc.property(
            format!("{}{env}", keys.secret_key_ref_prefix),
            format!("{}:{}", secret.name, secret.key),
        );
    }

    if role == SparkApplicationRole::Driver {
        doc.properties(
            SPARK_DRIVER_SERVICE_ANNOTATION_PREFIX,
            &spark_application.spec.driver.service_annotations,
        );
    }

    for secret in &pod.secrets {
        doc.property(format!("{}{}", keys.secrets_prefix, secret.name), &secret.path);
        let well_known = match secret.secret_type {
            SecretType::GCPServiceAccount => Some((
                ENV_GOOGLE_APPLICATION_CREDENTIALS,
                SERVICE_ACCOUNT_JSON_KEY_FILE_NAME,
            )),
            SecretType::HadoopDelegationToken => Some((
                ENV_HADOOP_TOKEN_FILE_LOCATION,
                HADOOP_DELEGATION_TOKEN_FILE_NAME,
            )),
            SecretType::Generic => None,
        };
        if let Some((env, file_name)) = well_known {
            doc.property(
                format!("{}{env}", role.env_prefix()),
                format!("{}/{file_name}", secret.path.trim_end_matches('/')),
            );
        }
    }

    doc.properties(role.env_prefix(), &pod.env_vars);
}

fn escaped_list(values: &[String]) -> String {
    values
        .iter()
        .map(|value| escape(value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Reads the entries of a Java properties file such as `spark-defaults.conf`, sorted by key.
///
/// A missing, unreadable or malformed file yields no entries.
pub fn read_defaults_file(path: &Path) -> Vec<(String, String)> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No Spark defaults file found");
            return Vec::new();
        }
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = &error as &dyn std::error::Error,
                "Ignoring unreadable Spark defaults file"
            );
            return Vec::new();
        }
    };

    match java_properties::read(BufReader::new(file)) {
        Ok(entries) => entries.into_iter().collect::<BTreeMap<_, _>>().into_iter().collect(),
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = &error as &dyn std::error::Error,
                "Ignoring malformed Spark defaults file"
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf};

    use chrono::TimeZone;
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    fn environment() -> SubmitEnvironment {
        SubmitEnvironment {
            kubernetes_service_host: "10.96.0.1".to_string(),
            kubernetes_service_port: "443".to_string(),
            spark_user: DEFAULT_SPARK_USER.to_string(),
            defaults_file: PathBuf::from("/does/not/exist/spark-defaults.conf"),
        }
    }

    fn spark_pi() -> SparkApplication {
        serde_yaml::from_str(indoc! {r#"
            ---
            apiVersion: sparkoperator.k8s.io/v1beta2
            kind: SparkApplication
            metadata:
              name: spark-pi
              namespace: spark-jobs
              labels:
                team: data
            spec:
              type: Scala
              mode: cluster
              image: "registry.example.com:5000/spark:3.5.1"
              imagePullPolicy: Always
              imagePullSecrets:
                - pull-a
                - pull-b
              mainClass: org.apache.spark.examples.SparkPi
              mainApplicationFile: "local:///opt/spark/examples/jars/spark-examples.jar"
              arguments:
                - "1000"
                - "--verbose=true"
              sparkConf:
                spark.kubernetes.driver.pod.name: ignored
                spark.driver.extraClassPath: "/opt/extra:/opt/more"
                spark.eventLog.enabled: "true"
              hadoopConf:
                fs.s3a.endpoint: "http://minio:9000"
              deps:
                jars:
                  - "local:///opt/jars/dep.jar"
                packages:
                  - org.apache.hadoop:hadoop-aws:3.3.4
              nodeSelector:
                disktype: ssd
              dynamicAllocation:
                enabled: true
                minExecutors: 1
                maxExecutors: 5
              monitoring:
                metricsPropertiesFile: /etc/metrics/metrics.properties
              driver:
                cores: 1
                coreLimit: "1200m"
                memory: "512m"
                serviceAccount: spark
                javaOptions: "-Dlog4j.configuration=file:/opt/log4j.properties"
                labels:
                  team: spark
                  version: "3.5.1"
                annotations:
                  opencensus.k8s-integration.sfdc.com/prometheus-targets: |
                    [{"port": 8090, "path": "/metrics"}]
                  legacy-opencensus.k8s-integration.sfdc.com/prometheus-targets: "a:b"
                  owner: "team:data"
                serviceAnnotations:
                  prometheus.io/scrape: "true"
                envSecretKeyRefs:
                  DB_PASSWORD:
                    name: db
                    key: password
                secrets:
                  - name: gcp
                    path: /mnt/gcp
                    secretType: GCPServiceAccount
                  - name: hadoop
                    path: /mnt/hadoop/
                    secretType: HadoopDelegationToken
                envVars:
                  FOO: bar
              executor:
                cores: 2
                instances: 3
                memory: "1g"
                deleteOnTermination: false
                javaOptions: "-Dlog4j.configuration=file:/opt/log4j.properties"
                labels:
                  role: worker
        "#})
        .unwrap()
    }

    fn identity(spark_application: &SparkApplication) -> RunIdentity {
        RunIdentity::with_run_id(
            spark_application,
            "submission-1",
            "spark-0123456789abcdef0123456789abcdef",
        )
    }

    fn build_spark_pi() -> SubmissionDocument {
        let spark_application = spark_pi();
        build(
            &spark_application,
            &identity(&spark_application),
            &environment(),
            &[],
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_identity_section() {
        let doc = build_spark_pi();

        assert_eq!(
            &doc.lines()[..7],
            [
                "spark.driver.host=spark-pi-driver-svc.spark-jobs.svc",
                "spark.app.id=spark-0123456789abcdef0123456789abcdef",
                "spark.master=k8s\\://https\\://10.96.0.1\\:443",
                "spark.submit.deployMode=cluster",
                "spark.kubernetes.namespace=spark-jobs",
                "spark.app.name=spark-pi",
                "spark.kubernetes.driver.pod.name=spark-pi-driver",
            ]
        );
        assert_eq!(
            Some("submission-1"),
            doc.get("spark.kubernetes.executor.label.sparkoperator.k8s.io/submission-id")
        );
        assert_eq!(
            Some("true"),
            doc.get("spark.kubernetes.driver.label.sparkoperator.k8s.io/launched-by-spark-operator")
        );
    }

    #[test]
    fn test_structured_fields() {
        let doc = build_spark_pi();

        assert_eq!(
            Some("registry.example.com\\:5000/spark\\:3.5.1"),
            doc.get("spark.kubernetes.container.image")
        );
        assert_eq!(Some("pull-a,pull-b"), doc.get("spark.kubernetes.container.image.pullSecrets"));
        assert_eq!(Some("0.1"), doc.get("spark.kubernetes.memoryOverheadFactor"));
        assert_eq!(Some("false"), doc.get("spark.kubernetes.submission.waitAppCompletion"));
        assert_eq!(
            Some("org.apache.hadoop:hadoop-aws:3.3.4"),
            doc.get("spark.jars.packages")
        );
        assert_eq!(Some("1"), doc.get("spark.driver.cores"));
        assert_eq!(Some("1200m"), doc.get("spark.kubernetes.driver.limit.cores"));
        assert_eq!(Some("512m"), doc.get("spark.driver.memory"));
        assert_eq!(Some("51m"), doc.get("spark.driver.memoryOverhead"));
        assert_eq!(
            Some("-Dlog4j.configuration\\=file\\:/opt/log4j.properties"),
            doc.get("spark.driver.extraJavaOptions")
        );
        assert_eq!(Some("3"), doc.get("spark.executor.instances"));
        assert_eq!(Some("2"), doc.get("spark.executor.cores"));
        assert_eq!(Some("102m"), doc.get("spark.executor.memoryOverhead"));
        assert_eq!(Some("false"), doc.get("spark.kubernetes.executor.deleteOnTermination"));
        assert_eq!(
            Some("-Dlog4j.configuration=file:/opt/log4j.properties"),
            doc.get("spark.executor.extraJavaOptions")
        );
        assert_eq!(Some("java"), doc.get("spark.kubernetes.resource.type"));
        assert_eq!(Some("1700000000000"), doc.get("spark.app.submitTime"));
        assert_eq!(
            Some("/spark-jobs-spark-pi(/|$)(.*)"),
            doc.get("spark.ui.proxyBase")
        );
        assert_eq!(Some("/"), doc.get("spark.ui.proxyRedirectUri"));
        assert_eq!(Some("spark-jobs.spark-pi"), doc.get("spark.metrics.namespace"));
        assert_eq!(Some("ssd"), doc.get("spark.kubernetes.node.selector.disktype"));
    }

    #[test]
    fn test_labels_and_annotations() {
        let doc = build_spark_pi();

        assert_eq!(Some("spark"), doc.get("spark.kubernetes.driver.label.team"));
        assert_eq!(Some("data"), doc.get("spark.kubernetes.executor.label.team"));
        assert_eq!(Some("worker"), doc.get("spark.kubernetes.executor.label.role"));
        assert_eq!(
            Some("[{\"port\"\\: 8090, \"path\"\\: \"/metrics\"}]"),
            doc.get(
                "spark.kubernetes.driver.annotation.opencensus.k8s-integration.sfdc.com/prometheus-targets"
            )
        );
        assert_eq!(
            Some("a:b"),
            doc.get(
                "spark.kubernetes.driver.annotation.legacy-opencensus.k8s-integration.sfdc.com/prometheus-targets"
            )
        );
        assert_eq!(Some("team:data"), doc.get("spark.kubernetes.driver.annotation.owner"));
        assert_eq!(
            Some("true"),
            doc.get("spark.kubernetes.driver.service.annotation.prometheus.io/scrape")
        );
    }

    #[test]
    fn test_secrets_and_env() {
        let doc = build_spark_pi();

        assert_eq!(
            Some("db:password"),
            doc.get("spark.kubernetes.driver.secretKeyRef.DB_PASSWORD")
        );
        assert_eq!(Some("/mnt/gcp"), doc.get("spark.kubernetes.driver.secrets.gcp"));
        assert_eq!(
            Some("/mnt/gcp/key.json"),
            doc.get("spark.kubernetes.driverEnv.GOOGLE_APPLICATION_CREDENTIALS")
        );
        assert_eq!(
            Some("/mnt/hadoop/hadoop.token"),
            doc.get("spark.kubernetes.driverEnv.HADOOP_TOKEN_FILE_LOCATION")
        );
        assert_eq!(Some("bar"), doc.get("spark.kubernetes.driverEnv.FOO"));
    }

    #[test]
    fn test_dynamic_allocation() {
        let doc = build_spark_pi();
        let lines = doc.lines();

        let enabled = lines
            .iter()
            .position(|line| line == "spark.dynamicAllocation.enabled=true")
            .unwrap();
        assert_eq!(
            "spark.dynamicAllocation.shuffleTracking.enabled=true",
            lines[enabled + 1]
        );
        assert_eq!(Some("1"), doc.get("spark.dynamicAllocation.minExecutors"));
        assert_eq!(Some("5"), doc.get("spark.dynamicAllocation.maxExecutors"));
        assert_eq!(None, doc.get("spark.dynamicAllocation.initialExecutors"));

        let mut spark_application = spark_pi();
        spark_application
            .spec
            .dynamic_allocation
            .as_mut()
            .unwrap()
            .enabled = false;
        let doc = build(
            &spark_application,
            &identity(&spark_application),
            &environment(),
            &[],
            Utc::now(),
        )
        .unwrap();
        assert!(!doc.lines().iter().any(|line| line.starts_with("spark.dynamicAllocation")));
    }

    #[test]
    fn test_map_entries_and_tail() {
        let doc = build_spark_pi();
        let lines = doc.lines();

        assert!(!lines.iter().any(|line| line == "spark.kubernetes.driver.pod.name=ignored"));
        assert_eq!(
            Some("/opt/extra\\:/opt/more"),
            doc.get("spark.driver.extraClassPath")
        );
        assert_eq!(Some("http://minio:9000"), doc.get("spark.hadoop.fs.s3a.endpoint"));
        assert_eq!(Some("/opt/hadoop/conf"), doc.get("spark.hadoop.HADOOP_CONF_DIR"));

        let ui_proxy = lines
            .iter()
            .position(|line| line.starts_with("spark.ui.proxyRedirectUri="))
            .unwrap();
        let event_log = lines
            .iter()
            .position(|line| line == "spark.eventLog.enabled=true")
            .unwrap();
        assert!(ui_proxy < event_log);

        assert_eq!(
            &lines[lines.len() - 3..],
            [
                "spark.jars=local\\:///opt/spark/examples/jars/spark-examples.jar,local\\:///opt/jars/dep.jar",
                "1000",
                "--verbose=true",
            ]
        );
        assert_eq!(1, lines.iter().filter(|line| line.starts_with("spark.jars=")).count());
    }

    fn defaults_file(content: &str) -> PathBuf {
        let path =
            std::env::temp_dir().join(format!("spark-defaults-{}.conf", uuid::Uuid::new_v4()));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults_file_has_lowest_precedence() {
        let defaults_file = defaults_file(indoc! {r"
            # cluster wide defaults
            spark.eventLog.enabled false
            spark.eventLog.dir=s3a://logs/
            spark.app.name=overridden
            spark.kubernetes\u002Enamespace=elsewhere
        "});
        let spark_application = spark_pi();
        let environment = SubmitEnvironment {
            defaults_file: defaults_file.clone(),
            ..environment()
        };

        let doc = build(
            &spark_application,
            &identity(&spark_application),
            &environment,
            &[],
            Utc::now(),
        )
        .unwrap();
        fs::remove_file(defaults_file).unwrap();

        assert_eq!(Some("s3a://logs/"), doc.get("spark.eventLog.dir"));
        assert_eq!(Some("true"), doc.get("spark.eventLog.enabled"));
        assert_eq!(Some("spark-pi"), doc.get("spark.app.name"));
        assert_eq!(Some("spark-jobs"), doc.get("spark.kubernetes.namespace"));
        assert_eq!(
            1,
            doc.lines()
                .iter()
                .filter(|line| line.starts_with("spark.kubernetes.namespace="))
                .count()
        );
    }

    #[test]
    fn test_local_dir_options() {
        let spark_application = spark_pi();
        let options =
            ["spark.kubernetes.driver.volumes.emptyDir.spark-local-dir-1.mount.path=/tmp/spill".to_string()];

        let doc = build(
            &spark_application,
            &identity(&spark_application),
            &environment(),
            &options,
            Utc::now(),
        )
        .unwrap();

        assert!(doc.lines().contains(&options[0]));
    }

    #[test]
    fn test_minimal_application() {
        let spark_application = SparkApplication::new("minimal", Default::default());

        let doc = build(
            &spark_application,
            &identity(&spark_application),
            &environment(),
            &[],
            Utc::now(),
        )
        .unwrap();

        assert_eq!(Some("1"), doc.get("spark.driver.cores"));
        assert_eq!(Some("1024m"), doc.get("spark.driver.memory"));
        assert_eq!(Some("102m"), doc.get("spark.driver.memoryOverhead"));
        assert_eq!(Some("1g"), doc.get("spark.executor.memory"));
        assert_eq!(Some("409m"), doc.get("spark.executor.memoryOverhead"));
        assert_eq!(Some("default"), doc.get("spark.kubernetes.namespace"));
        assert_eq!(None, doc.get("spark.jars"));
        assert_eq!(None, doc.get("spark.kubernetes.resource.type"));
        assert_eq!(None, doc.get("spark.hadoop.HADOOP_CONF_DIR"));
        assert!(doc.to_string().ends_with("spark.ui.proxyRedirectUri=/\n"));
    }

    #[rstest]
    #[case("512m", None, 0.1, "51m")]
    #[case("1g", None, 0.4, "409m")]
    #[case("2g", Some("0.25"), 0.1, "512m")]
    #[case("2g", Some("300m"), 0.1, "300m")]
    fn test_document_memory_overhead(
        #[case] memory: &str,
        #[case] overhead: Option<&str>,
        #[case] default_factor: f64,
        #[case] expected: &str,
    ) {
        assert_eq!(
            expected,
            document_memory_overhead(SparkApplicationRole::Driver, memory, overhead, default_factor)
                .unwrap()
        );
    }

    #[rstest]
    #[case("inf")]
    #[case("NaN")]
    #[case("-0.1")]
    fn test_document_memory_overhead_factor_out_of_range(#[case] factor: &str) {
        assert!(matches!(
            document_memory_overhead(SparkApplicationRole::Executor, "1g", Some(factor), 0.1),
            Err(Error::RoleMemoryOverheadFactorOutOfRange { .. })
        ));
    }

    #[rstest]
    #[case("k8s://https://host:443", "k8s\\://https\\://host\\:443")]
    #[case("-Da=b", "-Da\\=b")]
    #[case("plain", "plain")]
    fn test_escape(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(expected, escape(input));
    }

    #[rstest]
    #[case("", "443")]
    #[case("host", "https")]
    #[case("host", "")]
    #[case("host", "70000")]
    fn test_unresolvable_master(#[case] host: &str, #[case] port: &str) {
        let environment = SubmitEnvironment {
            kubernetes_service_host: host.to_string(),
            kubernetes_service_port: port.to_string(),
            ..environment()
        };

        assert!(matches!(
            master_url(&environment),
            Err(Error::ResolveMasterUrl { .. })
        ));
    }

    #[test]
    fn test_read_defaults_file() {
        let defaults_file = defaults_file(indoc! {r"
            # comment
            ! another comment

            spark.b=2
            spark.a : 1
            spark.c   3
            spark.d = a=b
            spark.e=first,\
                    second
            spark\=f=6
            spark\:g\ h=7
            spark.i=\u0041
            spark.j
        "});

        let entries = read_defaults_file(&defaults_file);
        fs::remove_file(defaults_file).unwrap();

        assert_eq!(
            vec![
                ("spark.a".to_string(), "1".to_string()),
                ("spark.b".to_string(), "2".to_string()),
                ("spark.c".to_string(), "3".to_string()),
                ("spark.d".to_string(), "a=b".to_string()),
                ("spark.e".to_string(), "first,second".to_string()),
                ("spark.i".to_string(), "A".to_string()),
                ("spark.j".to_string(), "".to_string()),
                ("spark:g h".to_string(), "7".to_string()),
                ("spark=f".to_string(), "6".to_string()),
            ],
            entries
        );
    }

    #[test]
    fn test_missing_defaults_file() {
        assert!(read_defaults_file(Path::new("/does/not/exist/spark-defaults.conf")).is_empty());
    }
}
