pub const ITEMS_TABLE_NAME: &str = "Items";
pub const KEY: &str = "key";
pub const VALUE: &str = "value";
pub const LABEL: &str = "label";

pub const ITEMS_LABEL_INDEX: &str = "ItemsByLabel";

// Session record fields
pub const NAME: &str = "name";
pub const ACTIVE: &str = "active";
pub const COUNTER: &str = "counter";
pub const DISTANCE_KM: &str = "distanceKm";
pub const SPEED_KMH: &str = "speedKmh";
pub const LAST_SAMPLE_ID: &str = "lastSampleId";
pub const AGGREGATED_COUNTER: &str = "aggregatedCounter";
