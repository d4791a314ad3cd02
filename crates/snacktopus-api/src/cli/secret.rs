//! Secret lookup command: `snacktopus secret get`.

use std::sync::Arc;

use anyhow::{Result, bail};
use console::style;

use snacktopus_core::service::secret::SecretService;
use snacktopus_infra::dapr::{DaprSecretProvider, SidecarClient};
use snacktopus_infra::secret::chain::build_secret_chain;
use snacktopus_types::config::Settings;

/// Environment first, then the sidecar's secret store unless `env_only`.
pub fn secret_service(settings: &Settings, env_only: bool) -> SecretService {
    let sidecar = (!env_only).then(|| {
        DaprSecretProvider::new(
            Arc::new(SidecarClient::for_port(settings.dapr_http_port)),
            settings.secret_store.clone(),
        )
    });
    SecretService::new(build_secret_chain(sidecar, true))
}

/// Resolve a secret and print its fields, masked unless `reveal`.
pub async fn get_secret(
    service: &SecretService,
    name: &str,
    field: Option<&str>,
    reveal: bool,
    json: bool,
) -> Result<()> {
    let Some(mut values) = service.get_secret(name).await? else {
        bail!("secret '{name}' not found");
    };

    if let Some(field) = field {
        let Some(value) = values.remove(field) else {
            bail!("secret '{name}' has no field '{field}'");
        };
        values.clear();
        values.insert(field.to_string(), value);
    }

    let shown: Vec<(String, String)> = values
        .into_iter()
        .map(|(k, v)| {
            let v = if reveal { v } else { SecretService::mask_secret(&v) };
            (k, v)
        })
        .collect();

    if json {
        let fields: serde_json::Map<String, serde_json::Value> = shown
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        println!(
            "{}",
            serde_json::json!({ "name": name, "masked": !reveal, "fields": fields })
        );
        return Ok(());
    }

    println!("  {} {}", style("Secret").bold(), style(name).cyan());
    for (k, v) in &shown {
        println!("    {}: {}", style(k).bold(), v);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_env_secret_without_sidecar() {
        // SAFETY: the variable name is unique to this test.
        unsafe {
            std::env::set_var(
                "SNACKTOPUS_SECRET_CLI_LOOKUP_TEST",
                r#"{"apiKey":"sk-abcdefghij","region":"eu"}"#,
            );
        }
        let service = secret_service(&Settings::default(), true);

        get_secret(&service, "cli-lookup-test", None, false, true)
            .await
            .unwrap();
        get_secret(&service, "cli-lookup-test", Some("apiKey"), true, false)
            .await
            .unwrap();

        let err = get_secret(&service, "cli-lookup-test", Some("missing"), false, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no field 'missing'"));
    }

    #[tokio::test]
    async fn missing_secret_is_an_error() {
        let service = secret_service(&Settings::default(), true);
        let err = get_secret(&service, "cli-absent-secret", None, false, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
