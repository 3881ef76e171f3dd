//! Wiring of the registration services from configuration.

use crate::api::AppState;
use crate::config::{Config, DeliveryMode};
use crate::signal::SignalDelivery;
use anyhow::{Context, Result};
use onboarding_core::{
    Backend, ChallengeService, DeliverySink, FinalizationLedger, FlowRepository,
    FlowStateMachine, JwtIssuer, LogDelivery, MemoryAccountStore, MessageConfirmation, Outbox,
    ProvisioningService, StaticInviteResolver, TracingNotifications,
};
use onboarding_core::store::FlowRegistry;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything `main` needs to serve and purge.
pub struct Services {
    pub state: AppState,
    pub repository: FlowRepository,
    pub ledger: Arc<FinalizationLedger>,
}

/// Build the services described by `config`.
pub async fn build(config: &Config) -> Result<Services> {
    let repository = open_repository(config).await;
    let delivery = delivery_sink(config)?;
    let invites = load_invites(config).await?;

    let token_ttl = config.token_ttl()?;
    let credentials = match &config.auth.jwt_secret {
        Some(secret) => JwtIssuer::new(secret, config.auth.issuer.clone(), token_ttl),
        None => {
            warn!("AUTH__JWT_SECRET not set, access tokens will not survive a restart");
            JwtIssuer::ephemeral(config.auth.issuer.clone(), token_ttl)
        }
    };

    let provisioning = Arc::new(ProvisioningService::new(
        Arc::new(MemoryAccountStore::new()),
        Arc::new(invites),
        Arc::new(TracingNotifications),
        Arc::new(MessageConfirmation::new(delivery.clone())),
        Arc::new(credentials),
    ));
    let ledger = provisioning.ledger();

    let machine = FlowStateMachine::new(
        ChallengeService::new(delivery),
        provisioning,
        config.flow_ttl()?,
    );

    let state = AppState::new(repository.clone(), machine, config.session.secure_cookie);

    Ok(Services {
        state,
        repository,
        ledger,
    })
}

async fn open_repository(config: &Config) -> FlowRepository {
    if !config.flow.persist {
        info!("Persistence disabled, using in-memory flow storage");
        return FlowRepository::memory();
    }

    let backend = Backend::new(
        config.flow.path.clone(),
        config.flow.encryption_secret.as_ref(),
    );

    match FlowRepository::open(backend).await {
        Ok(repository) => {
            info!(
                active_flows = repository.count_active().await,
                "Loaded flow registry"
            );
            repository
        }
        Err(e) => {
            error!("Failed to load flow registry: {}", e);
            info!("Starting with empty flow registry");
            FlowRepository::new(
                FlowRegistry::new(),
                Backend::new(
                    config.flow.path.clone(),
                    config.flow.encryption_secret.as_ref(),
                ),
            )
        }
    }
}

fn delivery_sink(config: &Config) -> Result<Arc<dyn DeliverySink>> {
    let sink: Arc<dyn DeliverySink> = match config.delivery.mode {
        DeliveryMode::Log => {
            warn!("Log delivery enabled, verification codes are written to the log");
            Arc::new(LogDelivery)
        }
        DeliveryMode::Outbox => Arc::new(Outbox::new()),
        DeliveryMode::Signal => {
            let sender = config
                .delivery
                .sender_number
                .as_deref()
                .context("DELIVERY__SENDER_NUMBER is required for signal delivery")?;
            Arc::new(
                SignalDelivery::new(&config.delivery.signal_api_url, sender)
                    .context("Failed to create Signal client")?,
            )
        }
    };
    Ok(sink)
}

async fn load_invites(config: &Config) -> Result<StaticInviteResolver> {
    match &config.invites.path {
        Some(path) => {
            let invites = StaticInviteResolver::from_file(path)
                .await
                .with_context(|| format!("Failed to load invites from {}", path.display()))?;
            info!(path = %path.display(), "Loaded invite directory");
            Ok(invites)
        }
        None => {
            info!("No invite directory configured, join tokens will not resolve");
            Ok(StaticInviteResolver::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn outbox_config() -> Config {
        let mut config = Config::default();
        config.delivery.mode = DeliveryMode::Outbox;
        config.flow.persist = false;
        config
    }

    #[tokio::test]
    async fn test_build_in_memory() {
        let services = tokio_test::assert_ok!(build(&outbox_config()).await);

        assert!(!services.repository.is_persistent());
        assert_eq!(services.state.machine.ttl(), chrono::Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_build_with_encrypted_store_and_invites() {
        let dir = tempfile::tempdir().unwrap();
        let invites = dir.path().join("invites.json");
        tokio::fs::write(
            &invites,
            r#"{"classes":{"abc":{"school_id":"s1","class_id":"c1"}},"schools":{}}"#,
        )
        .await
        .unwrap();

        let mut config = outbox_config();
        config.flow.persist = true;
        config.flow.path = dir.path().join("flows.enc");
        config.flow.encryption_secret = Some(SecretString::new("flow-secret".to_string()));
        config.invites.path = Some(invites);

        let services = build(&config).await.unwrap();
        assert!(services.repository.is_persistent());
    }

    #[tokio::test]
    async fn test_missing_invite_file_fails() {
        let mut config = outbox_config();
        config.invites.path = Some("/nonexistent/invites.json".into());

        assert!(build(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_signal_delivery_requires_sender() {
        let mut config = outbox_config();
        config.delivery.mode = DeliveryMode::Signal;

        let err = build(&config).await.err().unwrap();
        assert!(err.to_string().contains("DELIVERY__SENDER_NUMBER"));
    }
}
