use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use std::path::PathBuf;

fn default_host() -> String {
    "db".to_string()
}

pub fn postgres_url_from_environment() -> String {
    #[derive(Debug, PartialEq, Deserialize)]
    struct PostgresConfig {
        user: String,
        password: Option<String>,
        password_file: Option<PathBuf>,
        #[serde(default = "default_host")]
        host: String,
        db: String,
    }
    let provider = figment::providers::Env::prefixed("POSTGRES_");
    let postgres_config: PostgresConfig = figment::Figment::from(provider)
        .extract()
        .expect("Postgres configuration environment variable(s) missing or invalid");

    let password = if let Some(password) = postgres_config.password {
        password
    } else if let Some(password_file) = postgres_config.password_file {
        std::fs::read_to_string(password_file).expect("Failed to read postgres password file")
    } else {
        panic!("One of POSTGRES_PASSWORD or POSTGRES_PASSWORD_FILE must be provided");
    };

    // Postgres truncates passwords at the first newline. A single trailing
    // newline is almost certainly an artifact of how the secret file was
    // written, so strip it; any other newline means the operator's real
    // password would be silently weakened, so refuse to start instead.
    let password = if let Some(pw) = password.strip_suffix("\n") {
        pw
    } else {
        &password
    };

    if password.contains("\n") {
        eprintln!(
            "Postgres password contains a non-terminal newline and would be insecurely \
            truncated. Provide a password without interior newlines."
        );
        panic!(
            "Postgres password contains a non-terminal newline and would be insecurely \
            truncated. Provide a password without interior newlines."
        );
    }

    let password = utf8_percent_encode(&password, NON_ALPHANUMERIC);

    format!(
        "postgres://{}:{}@{}/{}",
        postgres_config.user, password, postgres_config.host, postgres_config.db
    )
}
