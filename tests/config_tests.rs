//! Unit tests for configuration loading and validation

use vehicle_registry::config::{Config, MAX_VALIDITY_DAYS, MIN_VALIDITY_DAYS};

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::build_test_config;

/// What is tested: Built-in development configuration
/// Why: The service must start with placeholder values when asked to
#[test]
fn test_default_config_is_valid() {
    let config = Config::default();
    config.validate().unwrap();
    assert_eq!(config.eip712.domain_name, "VehicleRegistry");
    assert_eq!(config.issuer.validity_days, 7);
    assert!(config.database.url_env.is_none());
}

/// What is tested: Loading the shipped template
/// Why: Operators start from it, so it must parse and validate as is
#[test]
fn test_template_loads() {
    let config = Config::load_from_path("config/vehicle-registry.template.toml").unwrap();
    assert_eq!(config.chain.chain_id, 137);
    assert_eq!(config.api.port, 3340);
    assert_eq!(config.consumer.partitions, 4);
    assert_eq!(config.database.url_env.as_deref(), Some("DATABASE_URL"));
}

/// What is tested: Loading from a path that does not exist
/// Why: The error must point the operator at the template
#[test]
fn test_missing_file_mentions_template() {
    let err = Config::load_from_path("config/does-not-exist.toml").unwrap_err();
    assert!(err.to_string().contains("vehicle-registry.template.toml"));
}

/// What is tested: Sections omitted from the file
/// Why: Optional sections fall back to their defaults
#[test]
fn test_optional_sections_default() {
    let config: Config = toml::from_str(
        r#"
        [chain]
        chain_id = 137
        registry_addr = "0x00000000000000000000000000000000000000a1"
        vehicle_nft_addr = "0x00000000000000000000000000000000000000b2"

        [issuer]

        [relayer]
        url = "http://127.0.0.1:8090/v1/transactions"

        [device_cloud]
        base_url = "http://127.0.0.1:8091"

        [api]
        host = "0.0.0.0"
        port = 8080
        "#,
    )
    .unwrap();

    config.validate().unwrap();
    assert_eq!(config.issuer.private_key_env, "ISSUER_PRIVATE_KEY");
    assert_eq!(config.relayer.timeout_ms, 10_000);
    assert_eq!(config.consumer.queue_capacity, 64);
    assert_eq!(config.eip712.domain_version, "1");
}

/// What is tested: Invalid addresses, URLs and numeric settings
/// Why: Misconfiguration is caught at startup rather than on the first message
#[test]
fn test_validation_failures() {
    let mut bad_address = build_test_config();
    bad_address.chain.registry_addr = "0x1234".to_string();
    assert!(bad_address.validate().is_err());

    let mut bad_url = build_test_config();
    bad_url.device_cloud.base_url = "not a url".to_string();
    assert!(bad_url.validate().is_err());

    let mut zero_partitions = build_test_config();
    zero_partitions.consumer.partitions = 0;
    assert!(zero_partitions.validate().is_err());

    let mut no_validity = build_test_config();
    no_validity.issuer.validity_days = 0;
    assert!(no_validity.validate().is_err());

    let mut no_chain = build_test_config();
    no_chain.chain.chain_id = 0;
    assert!(no_chain.validate().is_err());
}

/// What is tested: Credential validity at, inside and outside its bounds
/// Why: Under a week a vehicle could be issued twice in one reward week; huge windows overflow date arithmetic
#[test]
fn test_validity_days_bounds() {
    let mut config = build_test_config();

    for days in [MIN_VALIDITY_DAYS, 30, MAX_VALIDITY_DAYS] {
        config.issuer.validity_days = days;
        config.validate().unwrap();
    }

    for days in [
        -1,
        1,
        MIN_VALIDITY_DAYS - 1,
        MAX_VALIDITY_DAYS + 1,
        i64::MAX,
    ] {
        config.issuer.validity_days = days;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("issuer.validity_days"));
    }
}
