//! CPU and memory requirements of the driver container.

use std::collections::BTreeMap;

use snafu::{OptionExt, ResultExt, Snafu, ensure};
use stackable_operator::k8s_openapi::{
    api::core::v1::ResourceRequirements, apimachinery::pkg::api::resource::Quantity,
};

use crate::crd::{
    SparkApplication,
    constants::{DEFAULT_CORES, DEFAULT_DRIVER_MEMORY_LIMIT_MIB, MIN_MEMORY_OVERHEAD_MIB},
    memory,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("invalid driver memory {memory:?}"))]
    DriverMemory {
        source: memory::Error,
        memory: String,
    },

    #[snafu(display("invalid driver memory overhead {overhead:?}"))]
    DriverMemoryOverhead {
        source: memory::Error,
        overhead: String,
    },

    #[snafu(display("invalid memory overhead factor {factor:?}"))]
    MemoryOverheadFactor {
        source: std::num::ParseFloatError,
        factor: String,
    },

    #[snafu(display("memory overhead factor {factor:?} is negative or not finite"))]
    MemoryOverheadFactorOutOfRange { factor: String },

    #[snafu(display("driver memory of {memory_mib} MiB plus {overhead_mib} MiB overhead is too large"))]
    DriverMemoryTooLarge { memory_mib: u64, overhead_mib: u64 },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Requests and limits of the driver container. Each of them may be absent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedResourceRequirement {
    pub request_cpu: Option<Quantity>,
    pub request_memory: Option<Quantity>,
    pub limit_cpu: Option<Quantity>,
    pub limit_memory: Option<Quantity>,
}

impl From<ResolvedResourceRequirement> for ResourceRequirements {
    fn from(resolved: ResolvedResourceRequirement) -> Self {
        let list = |cpu: Option<Quantity>, memory: Option<Quantity>| {
            let list = [("cpu", cpu), ("memory", memory)]
                .into_iter()
                .filter_map(|(name, quantity)| Some((name.to_string(), quantity?)))
                .collect::<BTreeMap<_, _>>();
            (!list.is_empty()).then_some(list)
        };

        ResourceRequirements {
            requests: list(resolved.request_cpu, resolved.request_memory),
            limits: list(resolved.limit_cpu, resolved.limit_memory),
            ..ResourceRequirements::default()
        }
    }
}

/// Resolves the driver container resources.
///
/// Memory is only requested if the driver declares it, otherwise the limit is based on
/// [`DEFAULT_DRIVER_MEMORY_LIMIT_MIB`]. The memory overhead is added from the first of these
/// that is set:
/// 1. the driver's `memoryOverhead` quantity
/// 2. the application's `memoryOverheadFactor`, at least [`MIN_MEMORY_OVERHEAD_MIB`]
///
/// CPU is always requested, the limit only if `coreLimit` is set.
pub fn resolve(spark_application: &SparkApplication) -> Result<ResolvedResourceRequirement> {
    let spec = &spark_application.spec;
    let driver = &spec.driver.pod;

    let memory_mib = match &driver.memory {
        Some(memory) => memory::to_mib(memory).context(DriverMemorySnafu { memory })?,
        None => DEFAULT_DRIVER_MEMORY_LIMIT_MIB,
    };
    let limit_memory = mib_quantity(driver_container_memory_mib(
        memory_mib,
        driver.memory_overhead.as_deref(),
        spec.memory_overhead_factor.as_deref(),
    )?);
    let request_memory = driver.memory.is_some().then(|| limit_memory.clone());

    let request_cpu = driver
        .core_request
        .clone()
        .or_else(|| driver.cores.map(|cores| cores.to_string()))
        .unwrap_or_else(|| DEFAULT_CORES.to_string());

    Ok(ResolvedResourceRequirement {
        request_cpu: Some(Quantity(request_cpu)),
        request_memory,
        limit_cpu: driver.core_limit.clone().map(Quantity),
        limit_memory: Some(limit_memory),
    })
}

/// Overhead policy of the driver container: an explicit overhead quantity wins over the factor,
/// and a factor based overhead never drops below [`MIN_MEMORY_OVERHEAD_MIB`].
fn driver_container_memory_mib(
    memory_mib: u64,
    overhead: Option<&str>,
    overhead_factor: Option<&str>,
) -> Result<u64> {
    let overhead_mib = match (overhead, overhead_factor) {
        (Some(overhead), _) => {
            memory::to_mib(overhead).context(DriverMemoryOverheadSnafu { overhead })?
        }
        (None, Some(factor_value)) => {
            let factor = factor_value
                .trim()
                .parse::<f64>()
                .context(MemoryOverheadFactorSnafu {
                    factor: factor_value,
                })?;
            ensure!(
                factor.is_finite() && factor >= 0.0,
                MemoryOverheadFactorOutOfRangeSnafu {
                    factor: factor_value
                }
            );
            // Saturates for huge factors, which the addition below rejects.
            (factor * memory_mib as f64).max(MIN_MEMORY_OVERHEAD_MIB).ceil() as u64
        }
        (None, None) => 0,
    };

    memory_mib
        .checked_add(overhead_mib)
        .context(DriverMemoryTooLargeSnafu {
            memory_mib,
            overhead_mib,
        })
}

fn mib_quantity(mib: u64) -> Quantity {
    Quantity(format!("{mib}Mi"))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::crd::SparkApplicationSpec;

    fn spark_application(
        memory: Option<&str>,
        overhead: Option<&str>,
        factor: Option<&str>,
    ) -> SparkApplication {
        let mut spec = SparkApplicationSpec::default();
        spec.driver.pod.memory = memory.map(str::to_string);
        spec.driver.pod.memory_overhead = overhead.map(str::to_string);
        spec.memory_overhead_factor = factor.map(str::to_string);
        SparkApplication::new("app", spec)
    }

    #[rstest]
    #[case(Some("512m"), None, Some("0.1"), "896Mi")]
    #[case(Some("4g"), None, Some("0.2"), "4916Mi")]
    #[case(Some("512m"), Some("1g"), Some("0.1"), "1536Mi")]
    #[case(Some("1g"), Some("100"), None, "1124Mi")]
    #[case(Some("2g"), None, None, "2048Mi")]
    fn test_memory(
        #[case] memory: Option<&str>,
        #[case] overhead: Option<&str>,
        #[case] factor: Option<&str>,
        #[case] expected: &str,
    ) {
        let resolved = resolve(&spark_application(memory, overhead, factor)).unwrap();

        assert_eq!(Some(Quantity(expected.to_string())), resolved.request_memory);
        assert_eq!(Some(Quantity(expected.to_string())), resolved.limit_memory);
    }

    #[rstest]
    #[case(None, None, "1024Mi")]
    #[case(None, Some("0.1"), "1408Mi")]
    #[case(None, Some("0.4"), "1434Mi")]
    #[case(Some("256m"), None, "1280Mi")]
    fn test_default_memory(
        #[case] overhead: Option<&str>,
        #[case] factor: Option<&str>,
        #[case] expected: &str,
    ) {
        let resolved = resolve(&spark_application(None, overhead, factor)).unwrap();

        assert_eq!(None, resolved.request_memory);
        assert_eq!(Some(Quantity(expected.to_string())), resolved.limit_memory);
    }

    #[rstest]
    #[case(Some("500m"), Some(2), "500m")]
    #[case(None, Some(2), "2")]
    #[case(None, None, "1")]
    fn test_cpu_request(
        #[case] core_request: Option<&str>,
        #[case] cores: Option<i32>,
        #[case] expected: &str,
    ) {
        let mut spark_application = spark_application(None, None, None);
        spark_application.spec.driver.pod.core_request = core_request.map(str::to_string);
        spark_application.spec.driver.pod.cores = cores;

        let resolved = resolve(&spark_application).unwrap();

        assert_eq!(Some(Quantity(expected.to_string())), resolved.request_cpu);
        assert_eq!(None, resolved.limit_cpu);
    }

    #[test]
    fn test_cpu_limit() {
        let mut spark_application = spark_application(Some("1g"), None, None);
        spark_application.spec.driver.pod.core_limit = Some("1200m".to_string());

        let requirements: ResourceRequirements = resolve(&spark_application).unwrap().into();

        let limits = requirements.limits.unwrap();
        assert_eq!(Some(&Quantity("1200m".to_string())), limits.get("cpu"));
        assert_eq!(Some(&Quantity("1024Mi".to_string())), limits.get("memory"));
        let requests = requirements.requests.unwrap();
        assert_eq!(Some(&Quantity("1".to_string())), requests.get("cpu"));
        assert_eq!(Some(&Quantity("1024Mi".to_string())), requests.get("memory"));
    }

    #[test]
    fn test_partial_requests() {
        let requirements: ResourceRequirements = ResolvedResourceRequirement {
            request_cpu: Some(Quantity("1".to_string())),
            limit_memory: Some(Quantity("1024Mi".to_string())),
            ..ResolvedResourceRequirement::default()
        }
        .into();

        let requests = requirements.requests.unwrap();
        assert_eq!(1, requests.len());
        assert!(requests.contains_key("cpu"));
        assert!(!requirements.limits.unwrap().contains_key("cpu"));
    }

    #[rstest]
    #[case(Some("lots"), None, None)]
    #[case(Some("1g"), Some("huge"), None)]
    #[case(Some("1g"), None, Some("ten percent"))]
    #[case(Some("1g"), None, Some("inf"))]
    #[case(Some("1g"), None, Some("NaN"))]
    #[case(Some("1g"), None, Some("-0.5"))]
    #[case(Some("1g"), None, Some("1e300"))]
    #[case(Some("1e20"), None, None)]
    #[case(Some("1g"), Some("1e20"), None)]
    #[case(Some("10000000000000t"), Some("10000000000000t"), None)]
    fn test_malformed_input(
        #[case] memory: Option<&str>,
        #[case] overhead: Option<&str>,
        #[case] factor: Option<&str>,
    ) {
        assert!(resolve(&spark_application(memory, overhead, factor)).is_err());
    }
}
