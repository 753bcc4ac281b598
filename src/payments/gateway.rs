use std::collections::BTreeMap;
use std::net::IpAddr;

use hmac::{Hmac, Mac};
use sha2::Sha512;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{
    config::GatewayConfig,
    error::{AppError, Result},
};

type HmacSha512 = Hmac<Sha512>;

const SIGNATURE_PARAM: &str = "signature";

/// Outbound handoff to the payment gateway's hosted page. The transaction
/// reference is the enrollment id, which the gateway echoes back on
/// settlement.
#[derive(Debug, Clone)]
pub struct RedirectRequest {
    pub amount_cents: i64,
    pub txn_ref: Uuid,
    pub order_info: String,
    pub client_ip: IpAddr,
}

pub trait PaymentGateway: Send + Sync {
    /// Builds the signed URL the buyer is redirected to.
    fn build_redirect_url(&self, request: &RedirectRequest) -> Result<String>;

    /// Verifies the signature on a settlement callback's query params.
    fn verify_return(&self, params: &BTreeMap<String, String>) -> Result<()>;
}

/// Gateway client speaking the signed-redirect protocol: sorted query
/// params, HMAC-SHA512 over the encoded string, hex signature appended.
pub struct HmacRedirectGateway {
    config: GatewayConfig,
}

impl HmacRedirectGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    fn sign(&self, canonical: &str) -> Result<String> {
        let mut mac = HmacSha512::new_from_slice(self.config.secret.as_bytes())
            .map_err(|e| AppError::Gateway(format!("Invalid gateway secret: {}", e)))?;
        mac.update(canonical.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl PaymentGateway for HmacRedirectGateway {
    fn build_redirect_url(&self, request: &RedirectRequest) -> Result<String> {
        let mut params = BTreeMap::new();
        params.insert("version".to_string(), "1.0".to_string());
        params.insert("command".to_string(), "pay".to_string());
        params.insert("merchant".to_string(), self.config.merchant_code.clone());
        params.insert("amount".to_string(), request.amount_cents.to_string());
        params.insert("txn_ref".to_string(), request.txn_ref.to_string());
        params.insert(
            "order_info".to_string(),
            ascii_order_info(&request.order_info),
        );
        params.insert("client_ip".to_string(), request.client_ip.to_string());
        params.insert("return_url".to_string(), self.config.return_url.clone());

        let canonical = canonical_query(&params);
        let signature = self.sign(&canonical)?;

        Ok(format!(
            "{}?{}&{}={}",
            self.config.pay_url, canonical, SIGNATURE_PARAM, signature
        ))
    }

    fn verify_return(&self, params: &BTreeMap<String, String>) -> Result<()> {
        let provided = params
            .get(SIGNATURE_PARAM)
            .ok_or_else(|| AppError::BadRequest("Missing gateway signature".to_string()))?;

        let mut signed: BTreeMap<String, String> = params.clone();
        signed.remove(SIGNATURE_PARAM);

        let expected = self.sign(&canonical_query(&signed))?;

        if expected.as_bytes().ct_eq(provided.as_bytes()).into() {
            Ok(())
        } else {
            Err(AppError::BadRequest(
                "Invalid gateway signature".to_string(),
            ))
        }
    }
}

/// Sorted `key=urlencoded(value)` pairs joined with `&`. This is the exact
/// string that gets signed, on both the outbound and the callback side.
fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// The gateway's order-info field accepts only ASCII letters, digits and
/// spaces. Accented Latin letters fold to their base letter; anything else
/// is dropped, and whitespace runs collapse.
pub fn ascii_order_info(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars() {
        let folded = if c.is_ascii_alphanumeric() {
            Some(c)
        } else if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        } else {
            fold_diacritic(c)
        };

        if let Some(c) = folded {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(c);
        }
    }

    out
}

fn fold_diacritic(c: char) -> Option<char> {
    const GROUPS: &[(&str, char)] = &[
        ("àáảãạăằắẳẵặâầấẩẫậ", 'a'),
        ("ÀÁẢÃẠĂẰẮẲẴẶÂẦẤẨẪẬ", 'A'),
        ("èéẻẽẹêềếểễệë", 'e'),
        ("ÈÉẺẼẸÊỀẾỂỄỆË", 'E'),
        ("ìíỉĩịï", 'i'),
        ("ÌÍỈĨỊÏ", 'I'),
        ("òóỏõọôồốổỗộơờớởỡợö", 'o'),
        ("ÒÓỎÕỌÔỒỐỔỖỘƠỜỚỞỠỢÖ", 'O'),
        ("ùúủũụưừứửữựü", 'u'),
        ("ÙÚỦŨỤƯỪỨỬỮỰÜ", 'U'),
        ("ỳýỷỹỵ", 'y'),
        ("ỲÝỶỸỴ", 'Y'),
        ("đ", 'd'),
        ("Đ", 'D'),
    ];

    GROUPS
        .iter()
        .find(|(group, _)| group.contains(c))
        .map(|&(_, base)| base)
}
