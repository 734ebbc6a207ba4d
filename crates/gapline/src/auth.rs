//! Interactive user authentication.
//!
//! The flow asks a [`UserAuthenticator`] for each piece of input as the
//! server requests it: phone, login code, then the 2FA password or sign-up
//! details when needed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::AuthError;
use crate::transport::{Invoker, Request, Response, SentCode, TermsOfService, User};

/// Server error asking for the 2FA password after a valid code.
const SESSION_PASSWORD_NEEDED: &str = "SESSION_PASSWORD_NEEDED";

/// Name for a new account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignUpInfo {
    pub first_name: String,
    pub last_name: String,
}

/// Source of the answers the login flow needs, usually a terminal prompt.
#[async_trait]
pub trait UserAuthenticator: Send + Sync {
    async fn phone(&self) -> Result<String, AuthError>;

    async fn code(&self, sent: &SentCode) -> Result<String, AuthError>;

    async fn password(&self) -> Result<String, AuthError>;

    /// Returns `Ok` to accept the terms, an error to abort sign up.
    async fn accept_terms_of_service(&self, terms: &TermsOfService) -> Result<(), AuthError>;

    async fn sign_up(&self) -> Result<SignUpInfo, AuthError>;
}

/// Authenticator with fixed answers that refuses to create accounts.
#[derive(Debug, Clone)]
pub struct ConstantAuthenticator {
    pub phone: String,
    pub code: String,
    pub password: Option<String>,
}

#[async_trait]
impl UserAuthenticator for ConstantAuthenticator {
    async fn phone(&self) -> Result<String, AuthError> {
        Ok(self.phone.clone())
    }

    async fn code(&self, _sent: &SentCode) -> Result<String, AuthError> {
        Ok(self.code.clone())
    }

    async fn password(&self) -> Result<String, AuthError> {
        self.password
            .clone()
            .ok_or_else(|| AuthError::Input("account has a password but none was given".into()))
    }

    async fn accept_terms_of_service(&self, _terms: &TermsOfService) -> Result<(), AuthError> {
        Err(AuthError::SignUpRequired)
    }

    async fn sign_up(&self) -> Result<SignUpInfo, AuthError> {
        Err(AuthError::SignUpRequired)
    }
}

/// Runs the login exchange.
pub struct AuthFlow {
    authenticator: Arc<dyn UserAuthenticator>,
}

impl AuthFlow {
    pub fn new(authenticator: Arc<dyn UserAuthenticator>) -> Self {
        Self { authenticator }
    }

    /// Logs in through `api`, returning the authorized user.
    pub async fn run(&self, api: &dyn Invoker) -> Result<User, AuthError> {
        let phone = self.authenticator.phone().await?;
        let sent = match api.invoke(Request::SendCode { phone: phone.clone() }).await? {
            Response::SentCode(sent) => sent,
            other => return Err(other.unexpected("send_code").into()),
        };
        info!(delivery = %sent.delivery, "login code sent");

        let code = self.authenticator.code(&sent).await?;
        let sign_in = Request::SignIn {
            phone: phone.clone(),
            code_hash: sent.code_hash.clone(),
            code,
        };
        let response = match api.invoke(sign_in).await {
            Ok(response) => response,
            Err(e) if e.is_message(SESSION_PASSWORD_NEEDED) => {
                info!("account has two-factor authentication enabled");
                let password = self.authenticator.password().await?;
                api.invoke(Request::CheckPassword { password }).await?
            }
            Err(e) => return Err(e.into()),
        };

        match response {
            Response::Authorized(user) => Ok(user),
            Response::SignUpRequired { terms_of_service } => {
                self.sign_up(api, phone, sent, terms_of_service).await
            }
            other => Err(other.unexpected("sign_in").into()),
        }
    }

    async fn sign_up(
        &self,
        api: &dyn Invoker,
        phone: String,
        sent: SentCode,
        terms: Option<TermsOfService>,
    ) -> Result<User, AuthError> {
        if let Some(terms) = terms {
            self.authenticator.accept_terms_of_service(&terms).await?;
            api.invoke(Request::AcceptTermsOfService { id: terms.id }).await?;
        }
        let info = self.authenticator.sign_up().await?;
        let request = Request::SignUp {
            phone,
            code_hash: sent.code_hash,
            first_name: info.first_name,
            last_name: info.last_name,
        };
        match api.invoke(request).await? {
            Response::Authorized(user) => Ok(user),
            other => Err(other.unexpected("sign_up").into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::RpcError;

    /// Login server double; records the methods called.
    #[derive(Default)]
    struct LoginServer {
        two_factor: bool,
        new_account: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    fn user() -> User {
        User {
            id: 1,
            first_name: "Ada".into(),
            ..User::default()
        }
    }

    #[async_trait]
    impl Invoker for LoginServer {
        async fn invoke(&self, request: Request) -> Result<Response, RpcError> {
            self.calls.lock().unwrap().push(request.method());
            match request {
                Request::SendCode { .. } => Ok(Response::SentCode(SentCode {
                    code_hash: "hash".into(),
                    delivery: "app".into(),
                })),
                Request::SignIn { code, .. } if code != "12345" => {
                    Err(RpcError::rpc(400, "PHONE_CODE_INVALID"))
                }
                Request::SignIn { .. } if self.two_factor => {
                    Err(RpcError::rpc(401, SESSION_PASSWORD_NEEDED))
                }
                Request::SignIn { .. } if self.new_account => Ok(Response::SignUpRequired {
                    terms_of_service: Some(TermsOfService {
                        id: "tos-1".into(),
                        text: "be nice".into(),
                    }),
                }),
                Request::SignIn { .. } => Ok(Response::Authorized(user())),
                Request::CheckPassword { password } if password == "secret" => {
                    Ok(Response::Authorized(user()))
                }
                Request::CheckPassword { .. } => Err(RpcError::rpc(400, "PASSWORD_HASH_INVALID")),
                Request::AcceptTermsOfService { .. } => Ok(Response::Ok),
                Request::SignUp { first_name, .. } => Ok(Response::Authorized(User {
                    first_name,
                    ..user()
                })),
                other => Err(RpcError::Transport(format!("unexpected {}", other.method()))),
            }
        }
    }

    fn constant(code: &str, password: Option<&str>) -> Arc<dyn UserAuthenticator> {
        Arc::new(ConstantAuthenticator {
            phone: "+15550100".into(),
            code: code.into(),
            password: password.map(Into::into),
        })
    }

    #[tokio::test]
    async fn code_login() {
        let server = LoginServer::default();
        let user = AuthFlow::new(constant("12345", None)).run(&server).await.unwrap();
        assert_eq!(user.id, 1);
        assert_eq!(*server.calls.lock().unwrap(), vec!["send_code", "sign_in"]);
    }

    #[tokio::test]
    async fn two_factor_login() {
        let server = LoginServer {
            two_factor: true,
            ..LoginServer::default()
        };
        AuthFlow::new(constant("12345", Some("secret")))
            .run(&server)
            .await
            .unwrap();
        assert_eq!(
            *server.calls.lock().unwrap(),
            vec!["send_code", "sign_in", "check_password"]
        );
    }

    #[tokio::test]
    async fn two_factor_without_password_fails() {
        let server = LoginServer {
            two_factor: true,
            ..LoginServer::default()
        };
        let err = AuthFlow::new(constant("12345", None)).run(&server).await.unwrap_err();
        assert!(matches!(err, AuthError::Input(_)));
    }

    #[tokio::test]
    async fn wrong_code_is_rpc_error() {
        let server = LoginServer::default();
        let err = AuthFlow::new(constant("00000", None)).run(&server).await.unwrap_err();
        assert!(matches!(err, AuthError::Rpc(e) if e.is_message("PHONE_CODE_INVALID")));
    }

    #[tokio::test]
    async fn constant_authenticator_refuses_sign_up() {
        let server = LoginServer {
            new_account: true,
            ..LoginServer::default()
        };
        let err = AuthFlow::new(constant("12345", None)).run(&server).await.unwrap_err();
        assert!(matches!(err, AuthError::SignUpRequired));
    }

    struct Newcomer;

    #[async_trait]
    impl UserAuthenticator for Newcomer {
        async fn phone(&self) -> Result<String, AuthError> {
            Ok("+15550199".into())
        }

        async fn code(&self, _sent: &SentCode) -> Result<String, AuthError> {
            Ok("12345".into())
        }

        async fn password(&self) -> Result<String, AuthError> {
            Err(AuthError::Input("no password".into()))
        }

        async fn accept_terms_of_service(&self, terms: &TermsOfService) -> Result<(), AuthError> {
            assert_eq!(terms.id, "tos-1");
            Ok(())
        }

        async fn sign_up(&self) -> Result<SignUpInfo, AuthError> {
            Ok(SignUpInfo {
                first_name: "Grace".into(),
                last_name: "H".into(),
            })
        }
    }

    #[tokio::test]
    async fn sign_up_after_terms() {
        let server = LoginServer {
            new_account: true,
            ..LoginServer::default()
        };
        let user = AuthFlow::new(Arc::new(Newcomer)).run(&server).await.unwrap();
        assert_eq!(user.first_name, "Grace");
        assert_eq!(
            *server.calls.lock().unwrap(),
            vec!["send_code", "sign_in", "accept_terms_of_service", "sign_up"]
        );
    }
}
