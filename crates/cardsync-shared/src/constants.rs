/// URI scheme shared by every entity identifier
pub const ID_SCHEME: &str = "layer:///";

/// Identifier prefixes per entity kind
pub const CHANNEL_PREFIX: &str = "layer:///channels/";
pub const MESSAGE_PREFIX: &str = "layer:///messages/";
pub const CARD_MODEL_PREFIX: &str = "layer:///cardmodels/";

/// Path segment separating a message id from its part suffix
pub const PARTS_SEGMENT: &str = "/parts/";

/// MIME attribute names carried by every message part
pub const ATTR_ROLE: &str = "role";
pub const ATTR_NODE_ID: &str = "node-id";
pub const ATTR_PARENT_NODE_ID: &str = "parent-node-id";

/// Role assigned to the root part of a generated card message
pub const ROLE_ROOT: &str = "root";

/// Reserved role whose body holds the per-participant responses
pub const ROLE_RESPONSE_SUMMARY: &str = "response_summary";

/// Key renamed when a response summary is parsed
pub const PARTICIPANT_DATA_WIRE: &str = "participant_data";
pub const PARTICIPANT_DATA: &str = "participantData";

/// Default owning-client identifier
pub const DEFAULT_APP_ID: &str = "cardsync";

/// Default capacity of the transport event channel
pub const DEFAULT_EVENT_BUFFER: usize = 256;
