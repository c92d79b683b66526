//! Payment creation and polling.
//!
//! Creating a payment is two steps: a signed call to the processor, then a
//! `PENDING` ledger row keyed by the processor payment id. The webhook
//! reconciler takes it from there.

use serde_json::{Map, Value, json};
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::finik::{FinikClient, PaymentCreated, PaymentRequest};
use crate::models::payment::{
    CreatePaymentRequest, CreateRegistrationPaymentRequest, PaymentResponse, PaymentStatusResponse,
};
use crate::models::registration::{RegistrationData, SubscriptionChoice};
use crate::models::transaction::{NewTransaction, amount_to_cents, cents_to_amount};
use crate::repositories::{TransactionRepository, UserRepository};

const WEBHOOK_PATH: &str = "/api/payments/webhook";
const SUCCESS_PATH: &str = "/payment/success";

/// Merchant identity and callback URLs sent with every payment.
#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub account_id: Option<String>,
    pub merchant_category_code: String,
    pub name_en: String,
    pub webhook_url: Option<String>,
    pub redirect_url: Option<String>,
}

impl PaymentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            account_id: config.finik_account_id.clone(),
            merchant_category_code: config.finik_merchant_category_code.clone(),
            name_en: config.finik_name_en.clone(),
            webhook_url: config.finik_webhook_url.clone(),
            redirect_url: config.finik_redirect_url.clone(),
        }
    }

    fn account_id(&self) -> Result<&str, AppError> {
        self.account_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Configuration("FINIK_ACCOUNT_ID is not configured".to_string()))
    }

    /// Configured URLs, else ones pointing back at the host that served the request.
    fn urls(&self, request_host: &str) -> (String, String) {
        let webhook = self
            .webhook_url
            .clone()
            .unwrap_or_else(|| format!("http://{}{}", request_host, WEBHOOK_PATH));
        let redirect = self
            .redirect_url
            .clone()
            .unwrap_or_else(|| format!("http://{}{}", request_host, SUCCESS_PATH));
        (webhook, redirect)
    }
}

/// Start a subscription payment for an optional signed-in user.
///
/// # Process
///
/// 1. Validate the amount and merchant configuration
/// 2. Create the payment with the processor
/// 3. Record a `PENDING` ledger row owned by the user (if any)
///
/// # Errors
///
/// - `Validation`: amount is not positive
/// - `Configuration`: account id, API key, or signing key missing
/// - `Processor`: the processor refused or could not be reached
pub async fn create_payment(
    client: &FinikClient,
    transactions: &dyn TransactionRepository,
    settings: &PaymentSettings,
    request_host: &str,
    user_id: Option<Uuid>,
    request: CreatePaymentRequest,
) -> Result<PaymentResponse, AppError> {
    let amount_cents = validate_amount(request.amount)?;
    let account_id = settings.account_id()?;
    let (webhook_url, redirect_url) = settings.urls(request_host);

    let payment_type = request
        .payment_type
        .clone()
        .unwrap_or_else(|| "subscription".to_string());
    let subscription_type = request
        .subscription_type
        .clone()
        .unwrap_or_else(|| json!("1"));
    let description = request
        .description
        .clone()
        .unwrap_or_else(|| format!("Payment: {}", payment_type));

    let mut query = Vec::new();
    if let Some(user_id) = user_id {
        query.push(("userId", user_id.to_string()));
    }
    query.push(("amount", cents_to_amount(amount_cents).to_string()));
    if let Some(d) = &request.description {
        query.push(("description", d.clone()));
    }

    let mut custom_fields = Map::new();
    if let Some(user_id) = user_id {
        custom_fields.insert("userId".into(), json!(user_id.to_string()));
    }
    custom_fields.insert("paymentType".into(), json!(payment_type));
    custom_fields.insert("subscriptionType".into(), subscription_type.clone());

    let payment = PaymentRequest {
        amount_cents,
        redirect_url: with_query(&redirect_url, &query)?,
        account_id: account_id.to_string(),
        merchant_category_code: settings.merchant_category_code.clone(),
        name_en: settings.name_en.clone(),
        webhook_url,
        description: Some(description.clone()),
        start_date: None,
        end_date: None,
        custom_fields,
    };
    let created = client.create_payment(&payment).await?;

    let transaction = transactions
        .insert(NewTransaction::pending(
            created.payment_id.clone(),
            user_id,
            amount_cents,
            json!({
                "paymentType": payment_type,
                "subscriptionType": subscription_type,
                "description": description,
            }),
        ))
        .await?;

    match &user_id {
        Some(id) => tracing::info!(payment_id = %created.payment_id, user_id = %id, "Payment created"),
        None => tracing::info!(payment_id = %created.payment_id, "Payment created without a user"),
    }
    if created.payment_url.is_none() {
        tracing::warn!(payment_id = %created.payment_id, "Processor returned no payment URL");
    }

    Ok(response(created, transaction.id, amount_cents))
}

/// Start a payment that creates an account once it succeeds.
///
/// The registration payload is stored on the pending row (and sent to the
/// processor as a custom field) so the webhook can create the account
/// whichever copy reaches it.
///
/// # Errors
///
/// - `Validation`: bad amount, username (3-50 chars), email, or password (6+ chars)
/// - `Configuration`: account id, API key, or signing key missing
/// - `Processor`: the processor refused, was unreachable, or returned no usable payment URL
pub async fn create_registration_payment(
    client: &FinikClient,
    transactions: &dyn TransactionRepository,
    users: &dyn UserRepository,
    settings: &PaymentSettings,
    request_host: &str,
    request: CreateRegistrationPaymentRequest,
) -> Result<PaymentResponse, AppError> {
    let amount_cents = validate_amount(request.amount)?;
    validate_registration(&request.registration_data)?;
    let account_id = settings.account_id()?;
    let (webhook_url, redirect_url) = settings.urls(request_host);

    // Referral codes only earn coins; an unknown one is not an error
    let referral_code = request.registration_data.normalized_referral_code();
    let referrer_id = match &referral_code {
        Some(code) => match users.find_by_referral_code(code).await? {
            Some(referrer) => Some(referrer.id),
            None => {
                tracing::warn!(referral_code = %code, "Invalid referral code at payment creation");
                None
            }
        },
        None => None,
    };

    let mut registration = request.registration_data.clone();
    registration.username = registration.username.map(|u| u.trim().to_string());
    registration.email = registration.email.map(|e| e.trim().to_string());
    registration.referral_code = referral_code.clone();
    registration.referrer_id = referrer_id.map(|id| id.to_string());
    let subscription = registration.subscription.get_or_insert_with(SubscriptionChoice::default);
    let subscription_type = subscription.kind.clone().unwrap_or_else(|| json!("1"));

    let registration_value = serde_json::to_value(&registration)
        .map_err(|e| AppError::Internal(format!("Failed to serialize registration: {}", e)))?;

    let payment_type = request
        .payment_type
        .clone()
        .unwrap_or_else(|| "registration".to_string());
    let description = request.description.clone().unwrap_or_else(|| {
        format!(
            "Registration: {}",
            request.payment_type.as_deref().unwrap_or("subscription")
        )
    });

    let mut query = vec![
        ("registration", "true".to_string()),
        ("amount", cents_to_amount(amount_cents).to_string()),
    ];
    if let Some(d) = &request.description {
        query.push(("description", d.clone()));
    }
    if let Some(code) = &referral_code {
        query.push(("referralCode", code.clone()));
    }

    let mut custom_fields = Map::new();
    custom_fields.insert(
        "registrationData".into(),
        Value::String(registration_value.to_string()),
    );
    custom_fields.insert("paymentType".into(), json!(payment_type));
    custom_fields.insert("subscriptionType".into(), subscription_type.clone());

    let payment = PaymentRequest {
        amount_cents,
        redirect_url: with_query(&redirect_url, &query)?,
        account_id: account_id.to_string(),
        merchant_category_code: settings.merchant_category_code.clone(),
        name_en: settings.name_en.clone(),
        webhook_url,
        description: Some(description),
        start_date: None,
        end_date: None,
        custom_fields,
    };
    let created = client.create_payment(&payment).await?;

    let transaction = transactions
        .insert(NewTransaction::pending(
            created.payment_id.clone(),
            None,
            amount_cents,
            json!({
                "paymentType": payment_type,
                "registrationData": registration_value,
                "subscriptionType": subscription_type,
            }),
        ))
        .await?;

    tracing::info!(
        payment_id = %created.payment_id,
        transaction_id = %transaction.id,
        email = registration.email.as_deref().unwrap_or_default(),
        "Registration payment created"
    );

    match created.payment_url.as_deref() {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
        other => {
            tracing::error!(
                payment_id = %created.payment_id,
                payment_url = ?other,
                "Processor returned no usable payment URL"
            );
            return Err(AppError::Processor {
                status: None,
                message: "Payment processor returned no usable payment URL".to_string(),
            });
        }
    }

    Ok(response(created, transaction.id, amount_cents))
}

/// Ledger view of a payment, for clients polling after the redirect.
pub async fn payment_status(
    transactions: &dyn TransactionRepository,
    payment_id: &str,
) -> Result<PaymentStatusResponse, AppError> {
    let transaction = transactions
        .find_by_processor_id(payment_id)
        .await?
        .ok_or(AppError::TransactionNotFound)?;

    Ok(PaymentStatusResponse {
        success: true,
        payment_id: transaction.processor_transaction_id,
        transaction_id: transaction.id,
        status: transaction.status,
        amount: cents_to_amount(transaction.amount_cents),
        account_linked: transaction.user_id.is_some(),
    })
}

fn response(created: PaymentCreated, transaction_id: Uuid, amount_cents: i64) -> PaymentResponse {
    PaymentResponse {
        success: true,
        message: "Payment created successfully".to_string(),
        payment_id: created.payment_id,
        payment_url: created.payment_url,
        transaction_id,
        amount: cents_to_amount(amount_cents),
    }
}

fn validate_amount(amount: f64) -> Result<i64, AppError> {
    let cents = if amount.is_finite() { amount_to_cents(amount) } else { 0 };
    if cents <= 0 {
        return Err(AppError::Validation(
            "Amount must be greater than 0".to_string(),
        ));
    }
    Ok(cents)
}

fn validate_registration(data: &RegistrationData) -> Result<(), AppError> {
    let username = data.username.as_deref().map(str::trim).unwrap_or("");
    let length = username.chars().count();
    if !(3..=50).contains(&length) {
        return Err(AppError::Validation(
            "Username must be between 3 and 50 characters".to_string(),
        ));
    }

    let email = data.email.as_deref().map(str::trim).unwrap_or("");
    if !is_valid_email(email) {
        return Err(AppError::Validation("Invalid email".to_string()));
    }

    if data.password.as_deref().unwrap_or("").chars().count() < 6 {
        return Err(AppError::Validation(
            "Password must be at least 6 characters".to_string(),
        ));
    }

    Ok(())
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(name, tld)| !name.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

fn with_query(base: &str, params: &[(&str, String)]) -> Result<String, AppError> {
    let mut url = Url::parse(base)
        .map_err(|e| AppError::Configuration(format!("Invalid redirect URL {}: {}", base, e)))?;
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
    }
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finik::signer::test_keys;
    use crate::models::transaction::PaymentStatus;
    use crate::repositories::memory::{InMemoryTransactionRepository, InMemoryUserRepository};
    use mockito::Matcher;

    fn settings() -> PaymentSettings {
        PaymentSettings {
            account_id: Some("acc-1".to_string()),
            merchant_category_code: "0742".to_string(),
            name_en: "stud.kg Payment".to_string(),
            webhook_url: None,
            redirect_url: Some("https://quiz.example.kg/payment/success".to_string()),
        }
    }

    fn client(server: &mockito::Server) -> FinikClient {
        FinikClient::new(
            server.url(),
            Some("key-1".to_string()),
            Some(test_keys::merchant_private_pem()),
        )
        .unwrap()
    }

    fn registration_request(referral_code: Option<&str>) -> CreateRegistrationPaymentRequest {
        serde_json::from_value(json!({
            "amount": 500,
            "registrationData": {
                "username": " ann ",
                "email": "ann@example.com",
                "password": "secret1",
                "referralCode": referral_code,
                "subscription": {"type": "3"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("ann@example.com"));
        assert!(!is_valid_email("ann@example"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("ann example@example.com"));
        assert!(!is_valid_email("ann@@example.com"));
    }

    #[test]
    fn redirect_gets_query_parameters() {
        let url = with_query(
            "https://quiz.example.kg/payment/success",
            &[("amount", "500".to_string()), ("description", "a b".to_string())],
        )
        .unwrap();
        assert_eq!(
            url,
            "https://quiz.example.kg/payment/success?amount=500&description=a+b"
        );
    }

    #[test]
    fn default_urls_point_back_at_request_host() {
        let mut settings = settings();
        settings.redirect_url = None;
        let (webhook, redirect) = settings.urls("localhost:3000");
        assert_eq!(webhook, "http://localhost:3000/api/payments/webhook");
        assert_eq!(redirect, "http://localhost:3000/payment/success");
    }

    #[tokio::test]
    async fn registration_payment_stores_payload_and_referrer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/payment")
            .match_body(Matcher::PartialJson(json!({
                "Amount": 500,
                "RedirectUrl": "https://quiz.example.kg/payment/success?registration=true&amount=500&referralCode=AB12CD34",
                "Data": {"paymentType": "registration", "subscriptionType": "3"}
            })))
            .with_status(302)
            .with_header("location", "https://pay.finik.kg/qr/abc")
            .create_async()
            .await;
        let transactions = InMemoryTransactionRepository::new();
        let users = InMemoryUserRepository::new();
        let referrer = users.seed("bob", "bob@example.com", "AB12CD34");

        let response = create_registration_payment(
            &client(&server),
            &transactions,
            &users,
            &settings(),
            "localhost:3000",
            registration_request(Some("ab12cd34")),
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(response.payment_url.as_deref(), Some("https://pay.finik.kg/qr/abc"));

        let stored = transactions
            .find_by_processor_id(&response.payment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
        assert_eq!(stored.user_id, None);
        assert_eq!(stored.amount_cents, 50_000);

        let payload = stored.field("registrationData").unwrap();
        assert_eq!(payload["username"], "ann");
        assert_eq!(payload["referralCode"], "AB12CD34");
        assert_eq!(payload["referrerId"], json!(referrer.id.to_string()));
        assert_eq!(payload["subscription"]["type"], "3");
    }

    #[tokio::test]
    async fn invalid_registration_is_rejected_before_the_processor() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/v1/payment").expect(0).create_async().await;
        let transactions = InMemoryTransactionRepository::new();
        let users = InMemoryUserRepository::new();

        let mut request = registration_request(None);
        request.registration_data.password = Some("123".to_string());

        let err = create_registration_payment(
            &client(&server),
            &transactions,
            &users,
            &settings(),
            "localhost",
            request,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert!(transactions.all().is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_payment_url_fails_registration() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/payment")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let transactions = InMemoryTransactionRepository::new();
        let users = InMemoryUserRepository::new();

        let err = create_registration_payment(
            &client(&server),
            &transactions,
            &users,
            &settings(),
            "localhost",
            registration_request(None),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Processor { status: None, .. }));
        // The intent is still recorded so a late webhook can reconcile it
        assert_eq!(transactions.all().len(), 1);
    }

    #[tokio::test]
    async fn subscription_payment_records_owner() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/payment")
            .match_body(Matcher::PartialJson(json!({
                "Data": {"paymentType": "subscription", "subscriptionType": "1"}
            })))
            .with_status(302)
            .with_header("location", "https://pay.finik.kg/qr/s")
            .create_async()
            .await;
        let transactions = InMemoryTransactionRepository::new();
        let user_id = Uuid::new_v4();
        let request: CreatePaymentRequest = serde_json::from_value(json!({"amount": 250})).unwrap();

        let response = create_payment(
            &client(&server),
            &transactions,
            &settings(),
            "localhost",
            Some(user_id),
            request,
        )
        .await
        .unwrap();

        let stored = transactions
            .find_by_processor_id(&response.payment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.user_id, Some(user_id));
        assert_eq!(stored.field("paymentType"), Some(&json!("subscription")));
        assert_eq!(response.amount, json!(250));
    }

    #[tokio::test]
    async fn missing_account_id_is_a_configuration_error() {
        let server = mockito::Server::new_async().await;
        let transactions = InMemoryTransactionRepository::new();
        let mut settings = settings();
        settings.account_id = None;
        let request: CreatePaymentRequest = serde_json::from_value(json!({"amount": 250})).unwrap();

        let err = create_payment(&client(&server), &transactions, &settings, "localhost", None, request)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[tokio::test]
    async fn status_reports_linkage() {
        let transactions = InMemoryTransactionRepository::new();
        transactions
            .insert(NewTransaction::pending("P1".into(), None, 50_000, json!({})))
            .await
            .unwrap();

        let status = payment_status(&transactions, "P1").await.unwrap();
        assert_eq!(status.status, PaymentStatus::Pending);
        assert!(!status.account_linked);

        assert!(matches!(
            payment_status(&transactions, "missing").await,
            Err(AppError::TransactionNotFound)
        ));
    }
}
