//! Authentication mechanisms.
//!
//! A mechanism belongs to a scheme; backends list the schemes they accept.
//! Before a storage is constructed the mechanism gets a chance to rewrite
//! the backend options, which is how session credentials are injected.

use super::capability::{Frontend, Identifier, Visibility, visibility};
use super::parameter::DefinitionParameter;
use crate::config::BackendOptions;
use crate::storage::{StorageError, StorageResult};
use serde_json::{Value, json};
use std::fmt;
use zeroize::Zeroizing;

/// Authentication schemes.
pub mod scheme {
    /// No authentication
    pub const NULL: &str = "null";
    /// Backend-specific credentials carried in the backend options
    pub const BUILTIN: &str = "builtin";
    /// Username and password
    pub const PASSWORD: &str = "password";
    /// OAuth 2 client credentials and token
    pub const OAUTH2: &str = "oauth2";
    /// Public key pair
    pub const PUBLICKEY: &str = "publickey";
}

/// Identifiers of the built-in mechanisms.
pub mod mechanism {
    /// No authentication
    pub const NULL: &str = "null::null";
    /// Credentials live in the backend options
    pub const BUILTIN: &str = "builtin::builtin";
    /// Username and password entered with the mount
    pub const PASSWORD: &str = "password::password";
    /// Username and password of the acting session
    pub const SESSION_CREDENTIALS: &str = "password::sessioncredentials";
    /// OAuth 2
    pub const OAUTH2: &str = "oauth2::oauth2";
    /// RSA key pair
    pub const RSA: &str = "publickey::rsa";
}

/// Login credentials of the acting session.
#[derive(Clone)]
pub struct SessionCredentials {
    /// Login name
    pub user: String,
    /// Login password, wiped on drop
    pub password: Zeroizing<String>,
}

impl SessionCredentials {
    /// Credentials for `user`
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What a mechanism does to backend options before construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthBehavior {
    /// Leave options untouched
    Passthrough,
    /// Inject the session's `user` and `password`
    SessionCredentials,
}

/// An authentication mechanism definition.
#[derive(Debug, Clone)]
pub struct AuthMechanism {
    identifier: Identifier,
    scheme: String,
    frontend: Frontend,
    visibility: Visibility,
    behavior: AuthBehavior,
}

impl AuthMechanism {
    /// Mechanism with no parameters
    pub fn new(id: &str, scheme: &str, text: &str) -> Self {
        Self {
            identifier: Identifier::new(id),
            scheme: scheme.to_string(),
            frontend: Frontend::new(text),
            visibility: Visibility::default(),
            behavior: AuthBehavior::Passthrough,
        }
    }

    /// Add a parameter
    #[must_use]
    pub fn with_parameter(mut self, parameter: DefinitionParameter) -> Self {
        self.frontend.add_parameter(parameter);
        self
    }

    /// Add an alias
    #[must_use]
    pub fn with_alias(mut self, alias: &str) -> Self {
        self.identifier.add_alias(alias);
        self
    }

    /// Restrict visibility
    #[must_use]
    pub fn with_visibility(mut self, bits: u32) -> Self {
        self.visibility.set(bits);
        self
    }

    /// Change the option rewriting behavior
    #[must_use]
    pub fn with_behavior(mut self, behavior: AuthBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Canonical identifier
    pub fn id(&self) -> &str {
        self.identifier.id()
    }

    /// Identifier with aliases
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Scheme this mechanism implements
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Display text and parameters
    pub fn frontend(&self) -> &Frontend {
        &self.frontend
    }

    /// Visibility
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Option rewriting behavior
    pub fn behavior(&self) -> AuthBehavior {
        self.behavior
    }

    /// Whether every declared parameter accepts its value in `options`
    pub fn validate_options(&self, options: &BackendOptions) -> Result<(), String> {
        for parameter in self.frontend.parameters() {
            if !parameter.validate_value(options.get(parameter.name())) {
                return Err(parameter.name().to_string());
            }
        }
        Ok(())
    }

    /// Rewrite options before the storage is constructed.
    ///
    /// Session-credential mechanisms fail with
    /// [`StorageError::InsufficientData`] when no session is available.
    pub fn manipulate(
        &self,
        options: &mut BackendOptions,
        session: Option<&SessionCredentials>,
    ) -> StorageResult<()> {
        match self.behavior {
            AuthBehavior::Passthrough => Ok(()),
            AuthBehavior::SessionCredentials => {
                let session = session.ok_or_else(|| {
                    StorageError::InsufficientData("no session credentials available".into())
                })?;
                options.insert("user".into(), Value::String(session.user.clone()));
                options.insert(
                    "password".into(),
                    Value::String(session.password.as_str().to_string()),
                );
                Ok(())
            }
        }
    }

    /// Structured JSON form
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.frontend.text(),
            "identifier": self.id(),
            "scheme": self.scheme,
            "visibility": self.visibility.bits(),
            "configuration": self.frontend.parameters(),
        })
    }
}

/// All built-in mechanisms
pub fn builtin_mechanisms() -> Vec<AuthMechanism> {
    vec![
        AuthMechanism::new(mechanism::NULL, scheme::NULL, "None"),
        AuthMechanism::new(mechanism::BUILTIN, scheme::BUILTIN, "Built-in")
            .with_visibility(visibility::NONE),
        AuthMechanism::new(mechanism::PASSWORD, scheme::PASSWORD, "Username and password")
            .with_parameter(DefinitionParameter::new("user", "Username"))
            .with_parameter(DefinitionParameter::new("password", "Password").password()),
        AuthMechanism::new(
            mechanism::SESSION_CREDENTIALS,
            scheme::PASSWORD,
            "Log-in credentials, save in session",
        )
        .with_behavior(AuthBehavior::SessionCredentials),
        AuthMechanism::new(mechanism::OAUTH2, scheme::OAUTH2, "OAuth2")
            .with_parameter(DefinitionParameter::new("client_id", "Client ID"))
            .with_parameter(DefinitionParameter::new("client_secret", "Client secret").password())
            .with_parameter(DefinitionParameter::new("token", "Token").hidden()),
        AuthMechanism::new(mechanism::RSA, scheme::PUBLICKEY, "RSA public key")
            .with_parameter(DefinitionParameter::new("user", "Username"))
            .with_parameter(DefinitionParameter::new("public_key", "Public key"))
            .with_parameter(DefinitionParameter::new("private_key", "Private key").hidden()),
    ]
}
