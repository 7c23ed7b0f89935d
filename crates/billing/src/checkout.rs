//! Stripe Checkout for point packages
//!
//! A checkout session sells one package from the `store` section. The
//! package's points travel in the session metadata and are credited by the
//! webhook handler once payment completes.

use serde::Serialize;
use std::collections::HashMap;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData, CreateCheckoutSessionLineItemsPriceDataProductData,
    Currency,
};

use pointgate_shared::{PointPackage, StoreCatalog, UserId};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

pub const METADATA_USER_ID: &str = "user_id";
pub const METADATA_PACKAGE_ID: &str = "package_id";
pub const METADATA_POINTS: &str = "points";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: String,
}

pub struct CheckoutService {
    stripe: StripeClient,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    /// Create a one-off payment session for `package_id`
    pub async fn create_session(
        &self,
        user_id: UserId,
        package_id: &str,
        catalog: &StoreCatalog,
    ) -> BillingResult<CheckoutResponse> {
        let package = catalog
            .find(package_id)
            .ok_or_else(|| BillingError::PackageNotFound(package_id.to_string()))?;
        validate_package(package)?;
        let currency = parse_currency(&catalog.currency)?;

        let config = self.stripe.config();
        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Payment);
        params.success_url = Some(&config.success_url);
        params.cancel_url = Some(&config.cancel_url);

        let client_reference = user_id.to_string();
        params.client_reference_id = Some(&client_reference);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            quantity: Some(1),
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency,
                unit_amount: Some(package.price),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: format!("{} points", package.points),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        params.metadata = Some(session_metadata(user_id, package));

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;
        let url = session
            .url
            .ok_or_else(|| BillingError::Stripe("checkout session has no URL".to_string()))?;

        tracing::info!(
            user_id = %user_id,
            package_id = %package.id,
            points = package.points,
            session_id = %session.id,
            "Created checkout session"
        );

        Ok(CheckoutResponse {
            session_id: session.id.to_string(),
            url,
        })
    }
}

fn validate_package(package: &PointPackage) -> BillingResult<()> {
    if package.points <= 0 || package.price <= 0 {
        return Err(BillingError::Config(format!(
            "package '{}' must have positive points and price",
            package.id
        )));
    }
    Ok(())
}

fn session_metadata(user_id: UserId, package: &PointPackage) -> HashMap<String, String> {
    HashMap::from([
        (METADATA_USER_ID.to_string(), user_id.to_string()),
        (METADATA_PACKAGE_ID.to_string(), package.id.clone()),
        (METADATA_POINTS.to_string(), package.points.to_string()),
    ])
}

fn parse_currency(code: &str) -> BillingResult<Currency> {
    match code.to_ascii_lowercase().as_str() {
        "usd" => Ok(Currency::USD),
        "eur" => Ok(Currency::EUR),
        "gbp" => Ok(Currency::GBP),
        other => Err(BillingError::Config(format!(
            "unsupported store currency '{other}'"
        ))),
    }
}
