pub const DISTRIBUTION_LISTS: &str = "/distribution-lists";
pub const DISTRIBUTION_LIST: &str = "/distribution-lists/:id";
pub const DISTRIBUTION_LIST_CONTACTS: &str = "/distribution-lists/:id/contacts";

pub const CONTACTS: &str = "/contacts";
pub const CONTACT: &str = "/contacts/:id";

pub const CAMPAIGNS: &str = "/campaigns";
pub const CAMPAIGN: &str = "/campaigns/:id";
pub const CAMPAIGN_METRICS: &str = "/campaigns/:id/metrics";
pub const CAMPAIGN_RECIPIENTS: &str = "/campaigns/:id/recipients";
pub const CAMPAIGN_DISPATCH: &str = "/campaigns/:id/dispatch";

pub const TRACK_OPEN: &str = "/track/open";
pub const TRACK_UNSUBSCRIBE: &str = "/track/unsubscribe";
pub const TRACK_PIXEL: &str = "/track/pixel";

/// Link target embedded in every outgoing message.
pub const UNSUBSCRIBE: &str = "/unsubscribe";

pub const UNSUBSCRIBES: &str = "/unsubscribes";
pub const UNSUBSCRIBE_ENTRY: &str = "/unsubscribes/:id";

pub const OPENAPI: &str = "/openapi.json";
pub const DOCS: &str = "/docs";
