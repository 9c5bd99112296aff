use const_format::concatcp;

pub const FIELD_MANAGER: &str = "spark-k8s-alt-submit";

pub const SPARK_ID_PREFIX: &str = "spark";
pub const DEFAULT_NAMESPACE: &str = "default";

// Labels put on the driver pod and its Service.
pub const LABEL_APP_NAME: &str = "sparkoperator.k8s.io/app-name";
pub const LABEL_LAUNCHED_BY_SPARK_OPERATOR: &str = "sparkoperator.k8s.io/launched-by-spark-operator";
pub const LABEL_SUBMISSION_ID: &str = "sparkoperator.k8s.io/submission-id";
pub const LABEL_SPARK_APP_NAME: &str = "spark-app-name";
pub const LABEL_SPARK_APP_SELECTOR: &str = "spark-app-selector";
pub const LABEL_SPARK_ROLE: &str = "spark-role";

pub const ANNOTATION_PROMETHEUS_TARGETS: &str =
    "opencensus.k8s-integration.sfdc.com/prometheus-targets";

// Names of derived objects.
pub const DRIVER_POD_NAME_SUFFIX: &str = "-driver";
pub const CONFIG_MAP_NAME_SUFFIX: &str = "-conf-map";
pub const SERVICE_NAME_SUFFIX: &str = "-svc";
pub const LONG_SERVICE_NAME_SUFFIX: &str = "-driver-svc";
pub const MAX_DNS_LABEL_LENGTH: usize = 63;

// Driver container.
pub const CONTAINER_NAME_DRIVER: &str = "spark-kubernetes-driver";
pub const DRIVER_ARG: &str = "driver";
pub const DRIVER_ARG_PROPERTIES_FILE: &str = "--properties-file";
pub const DRIVER_ARG_CLASS: &str = "--class";
pub const DEFAULT_IMAGE_PULL_POLICY: &str = "IfNotPresent";
pub const TERMINATION_MESSAGE_PATH: &str = "/dev/termination-log";
pub const TERMINATION_MESSAGE_POLICY: &str = "File";
pub const CAPABILITY_ALL: &str = "ALL";

pub const DRIVER_PORT: i32 = 7078;
pub const DRIVER_PORT_NAME: &str = "driver-rpc-port";
pub const BLOCK_MANAGER_PORT: i32 = 7079;
pub const BLOCK_MANAGER_PORT_NAME: &str = "blockmanager";
pub const UI_PORT: i32 = 4040;
pub const UI_PORT_NAME: &str = "spark-ui";
pub const PORT_PROTOCOL: &str = "TCP";

// Driver pod.
pub const DNS_POLICY: &str = "ClusterFirst";
pub const RESTART_POLICY_NEVER: &str = "Never";
pub const DEFAULT_RUN_AS_ID: i64 = 185;
pub const DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS: i64 = 30;
pub const DEFAULT_TOLERATION_SECONDS: i64 = 300;
pub const TOLERATION_EFFECT: &str = "NoExecute";
pub const TOLERATION_OPERATOR: &str = "Exists";
pub const TAINT_NODE_NOT_READY: &str = "node.kubernetes.io/not-ready";
pub const TAINT_NODE_UNREACHABLE: &str = "node.kubernetes.io/unreachable";

// Service.
pub const SERVICE_TYPE_CLUSTER_IP: &str = "ClusterIP";
pub const NONE: &str = "None";

// Environment of the driver container.
pub const ENV_SPARK_USER: &str = "SPARK_USER";
pub const ENV_SPARK_APPLICATION_ID: &str = "SPARK_APPLICATION_ID";
pub const ENV_SPARK_DRIVER_BIND_ADDRESS: &str = "SPARK_DRIVER_BIND_ADDRESS";
pub const ENV_SPARK_LOCAL_DIRS: &str = "SPARK_LOCAL_DIRS";
pub const ENV_SPARK_CONF_DIR: &str = "SPARK_CONF_DIR";
pub const ENV_HADOOP_TOKEN_FILE_LOCATION: &str = "HADOOP_TOKEN_FILE_LOCATION";
pub const ENV_GOOGLE_APPLICATION_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const ENV_HADOOP_CONF_DIR: &str = "HADOOP_CONF_DIR";
pub const DEFAULT_SPARK_USER: &str = "185";
pub const POD_IP_FIELD_PATH: &str = "status.podIP";

// Volumes and paths.
pub const VOLUME_NAME_SPARK_CONF: &str = "spark-conf-volume-driver";
pub const VOLUME_MOUNT_PATH_SPARK_CONF: &str = "/opt/spark/conf";
pub const SPARK_ENV_SH_FILE_NAME: &str = "spark-env.sh";
pub const SPARK_ENV_SH_CONTENT: &str = "export SPARK_LOCAL_IP=$(hostname -i)\n";
pub const SPARK_PROPERTIES_FILE_NAME: &str = "spark.properties";
pub const SPARK_PROPERTIES_FILE_PATH: &str =
    concatcp!(VOLUME_MOUNT_PATH_SPARK_CONF, "/", SPARK_PROPERTIES_FILE_NAME);
pub const SPARK_DEFAULTS_FILE_PATH: &str =
    concatcp!(VOLUME_MOUNT_PATH_SPARK_CONF, "/spark-defaults.conf");
pub const CONFIG_FILE_MODE: i32 = 420;

pub const LOCAL_DIR_NAME_PREFIX: &str = "spark-local-dir-";
pub const LOCAL_DIR_FALLBACK_PATH_PREFIX: &str = "/var/data/spark-";
pub const EMPTY_DIR_MEDIUM_MEMORY: &str = "Memory";

pub const SECRET_VOLUME_SUFFIX: &str = "-volume";
pub const CONFIG_MAP_VOLUME_SUFFIX: &str = "-vol";

pub const VOLUME_NAME_KRB5_FILE: &str = "krb5-file";
pub const KRB5_FILE_NAME: &str = "krb5.conf";
pub const KRB5_FILE_MOUNT_PATH: &str = concatcp!("/etc/", KRB5_FILE_NAME);
pub const VOLUME_NAME_HADOOP_TOKEN: &str = "hadoop-secret";
pub const HADOOP_TOKEN_MOUNT_PATH: &str = "/mnt/secrets/hadoop-credentials";
pub const VOLUME_NAME_KUBERNETES_CREDENTIALS: &str = "kubernetes-credentials";
pub const KUBERNETES_CREDENTIALS_MOUNT_PATH: &str = "/mnt/secrets/spark-kubernetes-credentials";
pub const HADOOP_CONF_DIR_PATH: &str = "/opt/hadoop/conf";

pub const SERVICE_ACCOUNT_JSON_KEY_FILE_NAME: &str = "key.json";
pub const HADOOP_DELEGATION_TOKEN_FILE_NAME: &str = "hadoop.token";

// Submission environment defaults.
pub const ENV_KUBERNETES_SERVICE_HOST: &str = "KUBERNETES_SERVICE_HOST";
pub const ENV_KUBERNETES_SERVICE_PORT: &str = "KUBERNETES_SERVICE_PORT";
pub const DEFAULT_KUBERNETES_SERVICE_HOST: &str = "localhost";
pub const DEFAULT_KUBERNETES_SERVICE_PORT: &str = "443";

// Resource defaults.
pub const DEFAULT_CORES: &str = "1";
pub const DEFAULT_DRIVER_MEMORY: &str = "1024m";
pub const DEFAULT_EXECUTOR_MEMORY: &str = "1g";
pub const DEFAULT_DRIVER_MEMORY_LIMIT_MIB: u64 = 1024;
pub const DEFAULT_MEMORY_OVERHEAD_FACTOR: &str = "0.1";
pub const MIN_MEMORY_OVERHEAD_MIB: f64 = 384.0;
pub const DRIVER_DOCUMENT_OVERHEAD_FACTOR: f64 = 0.1;
pub const JVM_OVERHEAD_FACTOR: f64 = 0.1;
pub const NON_JVM_OVERHEAD_FACTOR: f64 = 0.4;

// Spark properties.
pub const SPARK_MASTER: &str = "spark.master";
pub const SPARK_APP_ID: &str = "spark.app.id";
pub const SPARK_APP_NAME: &str = "spark.app.name";
pub const SPARK_DRIVER_HOST: &str = "spark.driver.host";
pub const SPARK_SUBMIT_DEPLOY_MODE: &str = "spark.submit.deployMode";
pub const SPARK_KUBERNETES_NAMESPACE: &str = "spark.kubernetes.namespace";
pub const SPARK_DRIVER_POD_NAME: &str = "spark.kubernetes.driver.pod.name";
pub const SPARK_JARS: &str = "spark.jars";
pub const SPARK_ARCHIVES: &str = "spark.archives";
pub const SPARK_FILES: &str = "spark.files";
pub const SPARK_PY_FILES: &str = "spark.pyFiles";
pub const SPARK_JARS_PACKAGES: &str = "spark.jars.packages";
pub const SPARK_JARS_EXCLUDES: &str = "spark.jars.excludes";
pub const SPARK_JARS_REPOSITORIES: &str = "spark.jars.repositories";
pub const SPARK_CONTAINER_IMAGE: &str = "spark.kubernetes.container.image";
pub const SPARK_CONTAINER_IMAGE_PULL_POLICY: &str = "spark.kubernetes.container.image.pullPolicy";
pub const SPARK_CONTAINER_IMAGE_PULL_SECRETS: &str =
    "spark.kubernetes.container.image.pullSecrets";
pub const SPARK_PYTHON_VERSION: &str = "spark.kubernetes.pyspark.pythonVersion";
pub const SPARK_MEMORY_OVERHEAD_FACTOR: &str = "spark.kubernetes.memoryOverheadFactor";
pub const SPARK_WAIT_APP_COMPLETION: &str = "spark.kubernetes.submission.waitAppCompletion";
pub const SPARK_EXECUTOR_INSTANCES: &str = "spark.executor.instances";
pub const SPARK_EXECUTOR_DELETE_ON_TERMINATION: &str =
    "spark.kubernetes.executor.deleteOnTermination";
pub const SPARK_DRIVER_KUBERNETES_MASTER: &str = "spark.kubernetes.driver.master";
pub const SPARK_DRIVER_EXTRA_CLASS_PATH: &str = "spark.driver.extraClassPath";
pub const SPARK_EXECUTOR_EXTRA_CLASS_PATH: &str = "spark.executor.extraClassPath";
pub const SPARK_HADOOP_PREFIX: &str = "spark.hadoop.";
pub const SPARK_NODE_SELECTOR_PREFIX: &str = "spark.kubernetes.node.selector.";
pub const SPARK_DRIVER_ENV_PREFIX: &str = "spark.kubernetes.driverEnv.";
pub const SPARK_DRIVER_SERVICE_ANNOTATION_PREFIX: &str =
    "spark.kubernetes.driver.service.annotation.";
pub const SPARK_EXECUTOR_ENV_PREFIX: &str = "spark.executorEnv.";

pub const SPARK_DYNAMIC_ALLOCATION_ENABLED: &str = "spark.dynamicAllocation.enabled";
pub const SPARK_DYNAMIC_ALLOCATION_SHUFFLE_TRACKING_ENABLED: &str =
    "spark.dynamicAllocation.shuffleTracking.enabled";
pub const SPARK_DYNAMIC_ALLOCATION_INITIAL_EXECUTORS: &str =
    "spark.dynamicAllocation.initialExecutors";
pub const SPARK_DYNAMIC_ALLOCATION_MIN_EXECUTORS: &str = "spark.dynamicAllocation.minExecutors";
pub const SPARK_DYNAMIC_ALLOCATION_MAX_EXECUTORS: &str = "spark.dynamicAllocation.maxExecutors";
pub const SPARK_DYNAMIC_ALLOCATION_SHUFFLE_TRACKING_TIMEOUT: &str =
    "spark.dynamicAllocation.shuffleTracking.timeout";

pub const SPARK_SUBMIT_IN_DRIVER: &str = "spark.kubernetes.submitInDriver";
pub const SPARK_DRIVER_BLOCK_MANAGER_PORT: &str = "spark.driver.blockManager.port";
pub const SPARK_DRIVER_PORT: &str = "spark.driver.port";
pub const SPARK_RESOURCE_TYPE: &str = "spark.kubernetes.resource.type";
pub const SPARK_APP_SUBMIT_TIME: &str = "spark.app.submitTime";
pub const SPARK_UI_PROXY_BASE: &str = "spark.ui.proxyBase";
pub const SPARK_UI_PROXY_BASE_PATTERN: &str = "(/|$)(.*)";
pub const SPARK_UI_PROXY_REDIRECT_URI: &str = "spark.ui.proxyRedirectUri";
pub const SPARK_METRICS_NAMESPACE: &str = "spark.metrics.namespace";
pub const SPARK_METRICS_CONF: &str = "spark.metrics.conf";

pub const SPARK_LOCAL_DIR: &str = "spark.local.dir";
pub const SPARK_LOCAL_DIRS_TMPFS: &str = "spark.kubernetes.local.dirs.tmpfs";

pub const KERBEROS_KRB5_PATH: &str = "spark.kubernetes.kerberos.krb5.path";
pub const KERBEROS_KRB5_CONFIG_MAP_NAME: &str = "spark.kubernetes.kerberos.krb5.configMapName";
pub const KERBEROS_TOKEN_SECRET_NAME: &str = "spark.kubernetes.kerberos.tokenSecret.name";
pub const KERBEROS_TOKEN_SECRET_ITEM_KEY: &str = "spark.kubernetes.kerberos.tokenSecret.itemKey";

pub const AUTHENTICATE_DRIVER_OAUTH_TOKEN_FILE: &str =
    "spark.kubernetes.authenticate.driver.oauthTokenFile";
pub const AUTHENTICATE_DRIVER_CLIENT_KEY_FILE: &str =
    "spark.kubernetes.authenticate.driver.clientKeyFile";
pub const AUTHENTICATE_DRIVER_CLIENT_CERT_FILE: &str =
    "spark.kubernetes.authenticate.driver.clientCertFile";
pub const AUTHENTICATE_DRIVER_CA_CERT_FILE: &str = "spark.kubernetes.authenticate.driver.caCertFile";
