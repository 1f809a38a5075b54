use std::collections::HashMap;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Webhook signing secrets keyed by provider name.
    pub webhook_secrets: HashMap<String, String>,
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("SUBGATE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let mut webhook_secrets = HashMap::new();
        for (provider, var) in [
            ("mock", "MOCK_WEBHOOK_SECRET"),
            ("stripe", "STRIPE_WEBHOOK_SECRET"),
            ("paypal", "PAYPAL_WEBHOOK_SECRET"),
        ] {
            if let Ok(secret) = env::var(var) {
                webhook_secrets.insert(provider.to_string(), secret);
            }
        }

        // Dev mode gets a default mock secret so local webhooks work out of the box
        if dev_mode {
            webhook_secrets
                .entry("mock".to_string())
                .or_insert_with(|| "dev_mock_secret".to_string());
        }

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "subgate.db".to_string()),
            webhook_secrets,
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
