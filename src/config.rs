use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub operator_username: String,
    pub operator_password: String,
    pub checkout: CheckoutConfig,
}

/// Credentials and endpoints for the hosted-checkout provider. Injected into
/// the gateway client and signature verifier; nothing reads these from the
/// environment after startup.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub success_url: String,
    pub cancel_url: String,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(8000);
        let jwt_secret = env::var("JWT_SECRET")?;
        let operator_username = env::var("OPERATOR_USERNAME")?;
        let operator_password = env::var("OPERATOR_PASSWORD")?;

        let checkout = CheckoutConfig {
            secret_key: env::var("CHECKOUT_SECRET_KEY")?,
            webhook_secret: env::var("CHECKOUT_WEBHOOK_SECRET")?,
            api_base: env::var("CHECKOUT_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            success_url: env::var("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|_| format!("http://{host}:{port}/api/orders/success")),
            cancel_url: env::var("CHECKOUT_CANCEL_URL")
                .unwrap_or_else(|_| format!("http://{host}:{port}/api/orders/cancel")),
            request_timeout_secs: env::var("CHECKOUT_TIMEOUT_SECS")
                .ok()
                .and_then(|t| t.parse::<u64>().ok())
                .unwrap_or(15),
        };

        Ok(Self {
            database_url,
            host,
            port,
            jwt_secret,
            operator_username,
            operator_password,
            checkout,
        })
    }
}
