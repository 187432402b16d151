//! The resource catalog: one row per emulated resource type.
//!
//! The uniform dispatch handlers are parameterized entirely by this table —
//! route path, `object` tag, id prefix, required create params, extra
//! immutable fields, allowed list filters, and which create/delete behavior
//! variant applies. Adding a resource type is a one-row change.

/// How `POST /v1/<path>` builds the resource beyond the generic template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateBehavior {
    /// Generic template only: id, created, defaults, caller fields.
    Plain,
    /// Normalizes `items`/`plan`, stamps period bounds and `status: active`.
    Subscription,
    /// Consults payment chaos; declined creation responds 402.
    Charge,
    /// Consults payment chaos; declines surface on the intent, not as HTTP errors.
    PaymentIntent,
    /// Requires an existing charge; mints the refund balance transaction.
    Refund,
    /// Stamps checkout-session defaults (`status: open`, `payment_status: unpaid`).
    CheckoutSession,
}

/// How `DELETE /v1/<path>/:id` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteBehavior {
    /// Physical removal, `{deleted: true, id, object}` response.
    Remove,
    /// State transition to `canceled`; the record survives.
    CancelSubscription,
    /// No delete route at all.
    Disabled,
}

/// Which of the five uniform operations are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSet {
    /// create / retrieve / update / delete / list.
    Full,
    /// retrieve / list only (events, balance transactions).
    ReadOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceSpec {
    pub path: &'static str,
    pub object: &'static str,
    pub prefix: &'static str,
    pub table: &'static str,
    pub required: &'static [&'static str],
    pub extra_immutable: &'static [&'static str],
    pub list_filters: &'static [&'static str],
    pub create: CreateBehavior,
    pub delete: DeleteBehavior,
    pub routes: RouteSet,
}

impl ResourceSpec {
    pub fn url(&self) -> String {
        format!("/v1/{}", self.path)
    }
}

/// Internal store recording webhook delivery attempts; not routed.
pub const DELIVERIES_TABLE: &str = "webhook_deliveries";
pub const DELIVERIES_PREFIX: &str = "whd";

pub const WEBHOOKS_TABLE: &str = "webhook_endpoints";
pub const EVENTS_TABLE: &str = "events";
pub const SUBSCRIPTIONS_TABLE: &str = "subscriptions";
pub const SUBSCRIPTION_ITEMS_TABLE: &str = "subscription_items";
pub const INVOICES_TABLE: &str = "invoices";
pub const INVOICE_ITEMS_TABLE: &str = "invoiceitems";
pub const CHARGES_TABLE: &str = "charges";
pub const PAYMENT_INTENTS_TABLE: &str = "payment_intents";
pub const BALANCE_TRANSACTIONS_TABLE: &str = "balance_transactions";
pub const PRICES_TABLE: &str = "prices";
pub const PLANS_TABLE: &str = "plans";

pub const CATALOG: &[ResourceSpec] = &[
    ResourceSpec {
        path: "customers",
        object: "customer",
        prefix: "cus",
        table: "customers",
        required: &[],
        extra_immutable: &[],
        list_filters: &["email"],
        create: CreateBehavior::Plain,
        delete: DeleteBehavior::Remove,
        routes: RouteSet::Full,
    },
    ResourceSpec {
        path: "products",
        object: "product",
        prefix: "prod",
        table: "products",
        required: &[],
        extra_immutable: &[],
        list_filters: &["active"],
        create: CreateBehavior::Plain,
        delete: DeleteBehavior::Remove,
        routes: RouteSet::Full,
    },
    ResourceSpec {
        path: "prices",
        object: "price",
        prefix: "price",
        table: PRICES_TABLE,
        required: &["currency"],
        extra_immutable: &[],
        list_filters: &["product", "currency", "active"],
        create: CreateBehavior::Plain,
        delete: DeleteBehavior::Remove,
        routes: RouteSet::Full,
    },
    ResourceSpec {
        path: "plans",
        object: "plan",
        prefix: "plan",
        table: PLANS_TABLE,
        required: &["currency"],
        extra_immutable: &[],
        list_filters: &["product", "active"],
        create: CreateBehavior::Plain,
        delete: DeleteBehavior::Remove,
        routes: RouteSet::Full,
    },
    ResourceSpec {
        path: "subscriptions",
        object: "subscription",
        prefix: "sub",
        table: SUBSCRIPTIONS_TABLE,
        required: &["customer"],
        extra_immutable: &["customer"],
        list_filters: &["customer", "status", "price"],
        create: CreateBehavior::Subscription,
        delete: DeleteBehavior::CancelSubscription,
        routes: RouteSet::Full,
    },
    ResourceSpec {
        path: "subscription_items",
        object: "subscription_item",
        prefix: "si",
        table: SUBSCRIPTION_ITEMS_TABLE,
        required: &["subscription"],
        extra_immutable: &["subscription"],
        list_filters: &["subscription"],
        create: CreateBehavior::Plain,
        delete: DeleteBehavior::Remove,
        routes: RouteSet::Full,
    },
    ResourceSpec {
        path: "invoices",
        object: "invoice",
        prefix: "in",
        table: INVOICES_TABLE,
        required: &[],
        extra_immutable: &[],
        list_filters: &["customer", "subscription", "status"],
        create: CreateBehavior::Plain,
        delete: DeleteBehavior::Remove,
        routes: RouteSet::Full,
    },
    ResourceSpec {
        path: "invoiceitems",
        object: "invoiceitem",
        prefix: "ii",
        table: INVOICE_ITEMS_TABLE,
        required: &["customer"],
        extra_immutable: &[],
        list_filters: &["customer", "invoice"],
        create: CreateBehavior::Plain,
        delete: DeleteBehavior::Remove,
        routes: RouteSet::Full,
    },
    ResourceSpec {
        path: "payment_methods",
        object: "payment_method",
        prefix: "pm",
        table: "payment_methods",
        required: &["type"],
        extra_immutable: &[],
        list_filters: &["customer", "type"],
        create: CreateBehavior::Plain,
        delete: DeleteBehavior::Remove,
        routes: RouteSet::Full,
    },
    ResourceSpec {
        path: "payment_intents",
        object: "payment_intent",
        prefix: "pi",
        table: PAYMENT_INTENTS_TABLE,
        required: &["amount", "currency"],
        extra_immutable: &["amount"],
        list_filters: &["customer"],
        create: CreateBehavior::PaymentIntent,
        delete: DeleteBehavior::Disabled,
        routes: RouteSet::Full,
    },
    ResourceSpec {
        path: "charges",
        object: "charge",
        prefix: "ch",
        table: CHARGES_TABLE,
        required: &["amount", "currency"],
        extra_immutable: &["amount"],
        list_filters: &["customer", "payment_intent"],
        create: CreateBehavior::Charge,
        delete: DeleteBehavior::Disabled,
        routes: RouteSet::Full,
    },
    ResourceSpec {
        path: "refunds",
        object: "refund",
        prefix: "re",
        table: "refunds",
        required: &["charge"],
        extra_immutable: &["charge"],
        list_filters: &["charge"],
        create: CreateBehavior::Refund,
        delete: DeleteBehavior::Disabled,
        routes: RouteSet::Full,
    },
    ResourceSpec {
        path: "balance_transactions",
        object: "balance_transaction",
        prefix: "txn",
        table: BALANCE_TRANSACTIONS_TABLE,
        required: &[],
        extra_immutable: &[],
        list_filters: &["type", "source"],
        create: CreateBehavior::Plain,
        delete: DeleteBehavior::Disabled,
        routes: RouteSet::ReadOnly,
    },
    ResourceSpec {
        path: "events",
        object: "event",
        prefix: "evt",
        table: EVENTS_TABLE,
        required: &[],
        extra_immutable: &[],
        list_filters: &["type"],
        create: CreateBehavior::Plain,
        delete: DeleteBehavior::Disabled,
        routes: RouteSet::ReadOnly,
    },
    ResourceSpec {
        path: "tokens",
        object: "token",
        prefix: "tok",
        table: "tokens",
        required: &[],
        extra_immutable: &[],
        list_filters: &[],
        create: CreateBehavior::Plain,
        delete: DeleteBehavior::Remove,
        routes: RouteSet::Full,
    },
    ResourceSpec {
        path: "webhook_endpoints",
        object: "webhook_endpoint",
        prefix: "we",
        table: WEBHOOKS_TABLE,
        required: &["url"],
        extra_immutable: &[],
        list_filters: &[],
        create: CreateBehavior::Plain,
        delete: DeleteBehavior::Remove,
        routes: RouteSet::Full,
    },
    ResourceSpec {
        path: "checkout/sessions",
        object: "checkout.session",
        prefix: "cs",
        table: "checkout_sessions",
        required: &[],
        extra_immutable: &[],
        list_filters: &["customer", "status"],
        create: CreateBehavior::CheckoutSession,
        delete: DeleteBehavior::Disabled,
        routes: RouteSet::Full,
    },
];

/// Lookup by `object` tag.
pub fn spec_for_object(object: &str) -> Option<&'static ResourceSpec> {
    CATALOG.iter().find(|spec| spec.object == object)
}
