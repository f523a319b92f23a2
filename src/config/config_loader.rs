use anyhow::{Ok, Result};

use super::config_model::{Database, DotEnvyConfig, Server, Stripe, Subscription};

const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let server = Server {
        port: std::env::var("SERVER_PORT")
            .expect("SERVER_PORT is invalid")
            .parse()?,
        body_limit: std::env::var("SERVER_BODY_LIMIT")
            .expect("SERVER_BODY_LIMIT is invalid")
            .parse()?,
        timeout: std::env::var("SERVER_TIMEOUT")
            .expect("SERVER_TIMEOUT is invalid")
            .parse()?,
    };

    let database = Database {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL is invalid"),
    };

    let frontend_url =
        std::env::var("FRONTEND_URL").unwrap_or_else(|_| DEFAULT_FRONTEND_URL.to_string());

    let stripe = Stripe {
        secret_key: std::env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY is invalid"),
        webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
            .expect("STRIPE_WEBHOOK_SECRET is invalid"),
        success_url: format!(
            "{}/payment-success?session_id={{CHECKOUT_SESSION_ID}}",
            frontend_url
        ),
        cancel_url: format!("{}/payment-cancel", frontend_url),
    };

    let subscription = Subscription {
        term_days: std::env::var("SUBSCRIPTION_TERM_DAYS")
            .expect("SUBSCRIPTION_TERM_DAYS is invalid")
            .parse()?,
    };

    Ok(DotEnvyConfig {
        server,
        database,
        stripe,
        subscription,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn set_env_vars() {
        unsafe {
            env::set_var("SERVER_PORT", "8080");
            env::set_var("SERVER_BODY_LIMIT", "10");
            env::set_var("SERVER_TIMEOUT", "30");
            env::set_var("DATABASE_URL", "postgres://localhost:5432/subgate");
            env::set_var("STRIPE_SECRET_KEY", "sk_test_abc");
            env::set_var("STRIPE_WEBHOOK_SECRET", "whsec_abc");
            env::set_var("FRONTEND_URL", "https://app.example.com");
            env::set_var("SUBSCRIPTION_TERM_DAYS", "30");
        }
    }

    #[test]
    fn test_load_config_from_env() {
        set_env_vars();

        let config = load().expect("config should load");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.subscription.term_days, 30);
        assert_eq!(
            config.stripe.success_url,
            "https://app.example.com/payment-success?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(
            config.stripe.cancel_url,
            "https://app.example.com/payment-cancel"
        );
    }
}
