//! SASL authenticators

use sasl::client::mechanisms::{Anonymous, Plain, Scram};
use sasl::client::Mechanism;
use sasl::common::scram::{Sha1, Sha256};
use sasl::common::Credentials as SaslCredentials;

use crate::error::AuthError;
use crate::normalize::{normalize, NormalizationKind};

/// One SASL exchange.
///
/// A fresh authenticator is created for every SASL negotiation step.
pub trait Authenticator: Send {
    /// The mechanism name, e.g. `SCRAM-SHA-1`
    fn mechanism_name(&self) -> &str;

    /// Data sent with `<auth/>`. `None` sends no initial response,
    /// `Some(vec![])` an empty one.
    fn initial_response(&mut self) -> Option<Vec<u8>>;

    /// Compute the response to a server challenge. The flag is set once
    /// the authenticator expects no further challenge.
    fn step(&mut self, challenge: &[u8]) -> Result<(Option<Vec<u8>>, bool), AuthError>;

    /// Check the additional data carried by `<success/>`.
    fn success(&mut self, data: &[u8]) -> Result<(), AuthError> {
        let _ = data;
        Ok(())
    }
}

/// Supplies authenticators in preference order.
pub trait AuthenticatorProvider: Send + Sync {
    /// Mechanism names, most preferred first.
    fn preferences(&self) -> Vec<String>;

    /// Create an authenticator for `mechanism`.
    fn create(&self, mechanism: &str) -> Result<Box<dyn Authenticator>, AuthError>;
}

struct SaslMechanism {
    inner: Box<dyn Mechanism + Send + Sync>,
    // Challenges the mechanism answers before it is done.
    rounds: usize,
    steps: usize,
}

impl SaslMechanism {
    fn new(inner: Box<dyn Mechanism + Send + Sync>, rounds: usize) -> Self {
        SaslMechanism {
            inner,
            rounds,
            steps: 0,
        }
    }
}

impl Authenticator for SaslMechanism {
    fn mechanism_name(&self) -> &str {
        self.inner.name()
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        let initial = self.inner.initial();
        if initial.is_empty() {
            None
        } else {
            Some(initial)
        }
    }

    fn step(&mut self, challenge: &[u8]) -> Result<(Option<Vec<u8>>, bool), AuthError> {
        let response = self
            .inner
            .response(challenge)
            .map_err(|e| AuthError::Mechanism(e.to_string()))?;
        self.steps += 1;
        Ok((Some(response), self.steps >= self.rounds))
    }

    fn success(&mut self, data: &[u8]) -> Result<(), AuthError> {
        self.inner
            .success(data)
            .map_err(|e| AuthError::Mechanism(e.to_string()))
    }
}

/// Username and password authentication with the `sasl` crate's
/// mechanisms: SCRAM-SHA-256, SCRAM-SHA-1, PLAIN, then ANONYMOUS.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Credentials for `username`, usually the local part of the JID.
    pub fn new(username: &str, password: &str) -> Self {
        Credentials {
            username: username.to_owned(),
            password: password.to_owned(),
        }
    }

    fn sasl_credentials(&self) -> Result<SaslCredentials, AuthError> {
        let password = normalize(NormalizationKind::Saslprep, &self.password)
            .map_err(|e| AuthError::Mechanism(e.to_string()))?;
        Ok(SaslCredentials::default()
            .with_username(self.username.clone())
            .with_password(password.into_string()))
    }
}

impl AuthenticatorProvider for Credentials {
    fn preferences(&self) -> Vec<String> {
        ["SCRAM-SHA-256", "SCRAM-SHA-1", "PLAIN", "ANONYMOUS"]
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    fn create(&self, mechanism: &str) -> Result<Box<dyn Authenticator>, AuthError> {
        let mechanism_error = |e: sasl::client::MechanismError| AuthError::Mechanism(e.to_string());
        let (mechanism, rounds): (Box<dyn Mechanism + Send + Sync>, usize) = match mechanism {
            "SCRAM-SHA-256" => (
                Box::new(
                    Scram::<Sha256>::from_credentials(self.sasl_credentials()?)
                        .map_err(mechanism_error)?,
                ),
                1,
            ),
            "SCRAM-SHA-1" => (
                Box::new(
                    Scram::<Sha1>::from_credentials(self.sasl_credentials()?)
                        .map_err(mechanism_error)?,
                ),
                1,
            ),
            "PLAIN" => (
                Box::new(
                    Plain::from_credentials(self.sasl_credentials()?).map_err(mechanism_error)?,
                ),
                0,
            ),
            "ANONYMOUS" => (Box::new(Anonymous::new()), 0),
            _ => return Err(AuthError::NoMechanism),
        };
        Ok(Box::new(SaslMechanism::new(mechanism, rounds)))
    }
}
