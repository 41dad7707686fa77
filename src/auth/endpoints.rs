/// URL endpoints for Apple's iCloud authentication services.
/// Supports both "com" (international) and "cn" (China) domains.
use crate::types::Domain;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// `.../appleauth/auth`
    pub auth: String,
    /// Web app origin, doubles as the OAuth redirect URI.
    pub home: String,
    /// `.../setup/ws/1`
    pub setup: String,
}

impl Endpoints {
    pub fn for_domain(domain: Domain) -> Self {
        match domain {
            Domain::Com => Self {
                auth: "https://idmsa.apple.com/appleauth/auth".into(),
                home: "https://www.icloud.com".into(),
                setup: "https://setup.icloud.com/setup/ws/1".into(),
            },
            Domain::Cn => Self {
                auth: "https://idmsa.apple.com.cn/appleauth/auth".into(),
                home: "https://www.icloud.com.cn".into(),
                setup: "https://setup.icloud.com.cn/setup/ws/1".into(),
            },
        }
    }

    /// All services rooted at one base URL. Used against local test servers.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            auth: format!("{}/appleauth/auth", base),
            home: "https://www.icloud.com".into(),
            setup: format!("{}/setup/ws/1", base),
        }
    }

    pub fn signin(&self) -> String {
        format!("{}/signin", self.auth)
    }

    pub fn verify_code(&self) -> String {
        format!("{}/verify/trusteddevice/securitycode", self.auth)
    }

    pub fn trust(&self) -> String {
        format!("{}/2sv/trust", self.auth)
    }

    pub fn account_login(&self) -> String {
        format!("{}/accountLogin", self.setup)
    }

    pub fn validate(&self) -> String {
        format!("{}/validate", self.setup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_com_endpoints() {
        let e = Endpoints::for_domain(Domain::Com);
        assert_eq!(e.signin(), "https://idmsa.apple.com/appleauth/auth/signin");
        assert_eq!(
            e.verify_code(),
            "https://idmsa.apple.com/appleauth/auth/verify/trusteddevice/securitycode"
        );
        assert_eq!(e.trust(), "https://idmsa.apple.com/appleauth/auth/2sv/trust");
        assert_eq!(
            e.account_login(),
            "https://setup.icloud.com/setup/ws/1/accountLogin"
        );
        assert_eq!(e.validate(), "https://setup.icloud.com/setup/ws/1/validate");
    }

    #[test]
    fn test_cn_endpoints() {
        let e = Endpoints::for_domain(Domain::Cn);
        assert!(e.auth.contains(".com.cn"));
        assert_eq!(e.home, "https://www.icloud.com.cn");
    }

    #[test]
    fn test_with_base_strips_trailing_slash() {
        let e = Endpoints::with_base("http://127.0.0.1:8080/");
        assert_eq!(e.signin(), "http://127.0.0.1:8080/appleauth/auth/signin");
        assert_eq!(e.validate(), "http://127.0.0.1:8080/setup/ws/1/validate");
    }
}
