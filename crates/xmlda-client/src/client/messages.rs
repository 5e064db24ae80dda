// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Typed request and response records for the eight OPC XML-DA operations.
//!
//! Records are plain data. Turning them into SOAP envelopes and back is the
//! job of a [`WireCodec`](super::transport::WireCodec).

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xmlda_core::{Quality, Value};

use crate::types::{ClientItemHandle, ItemIdentity, ResultCode, ServerItemHandle, ServerSubHandle};

// =============================================================================
// Operation
// =============================================================================

/// The operations of the OPC XML-DA service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Read item values.
    Read,
    /// Write item values.
    Write,
    /// Create a subscription.
    Subscribe,
    /// Poll a subscription for changes.
    SubscriptionPolledRefresh,
    /// Cancel a subscription.
    SubscriptionCancel,
    /// Query server status.
    GetStatus,
    /// Query item properties.
    GetProperties,
    /// Browse the address space.
    Browse,
}

impl Operation {
    /// All operations.
    pub const ALL: [Operation; 8] = [
        Self::Read,
        Self::Write,
        Self::Subscribe,
        Self::SubscriptionPolledRefresh,
        Self::SubscriptionCancel,
        Self::GetStatus,
        Self::GetProperties,
        Self::Browse,
    ];

    /// Returns the SOAP operation name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "Read",
            Self::Write => "Write",
            Self::Subscribe => "Subscribe",
            Self::SubscriptionPolledRefresh => "SubscriptionPolledRefresh",
            Self::SubscriptionCancel => "SubscriptionCancel",
            Self::GetStatus => "GetStatus",
            Self::GetProperties => "GetProperties",
            Self::Browse => "Browse",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Common Records
// =============================================================================

/// Server state reported in every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerState {
    /// Normal operation.
    #[default]
    Running,
    /// Unrecoverable server error.
    Failed,
    /// Running without configuration.
    NoConfig,
    /// Temporarily suspended.
    Suspended,
    /// Test mode; values are simulated.
    Test,
    /// Lost communication with the underlying devices.
    CommFault,
}

impl ServerState {
    /// Returns `true` when the server serves real data.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Options common to every request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestOptions {
    /// Echoed back in the reply.
    pub client_request_handle: Option<String>,
    /// Locale for error and status text.
    pub locale_id: Option<String>,
    /// Ask for error text.
    pub return_error_text: bool,
    /// Ask for diagnostic information.
    pub return_diagnostic_info: bool,
    /// Ask for item timestamps.
    pub return_item_time: bool,
    /// Ask for item paths in replies.
    pub return_item_path: bool,
    /// Ask for item names in replies.
    pub return_item_name: bool,
    /// Absolute time after which the server should abandon the request.
    pub request_deadline: Option<DateTime<Utc>>,
}

impl RequestOptions {
    /// Options used by the engine: error text, item time and names.
    pub fn standard(locale_id: Option<String>) -> Self {
        Self {
            locale_id,
            return_error_text: true,
            return_item_time: true,
            return_item_path: true,
            return_item_name: true,
            ..Default::default()
        }
    }

    /// Sets the client request handle.
    pub fn with_request_handle(mut self, handle: impl Into<String>) -> Self {
        self.client_request_handle = Some(handle.into());
        self
    }
}

/// Header of every reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyBase {
    /// Time the server received the request.
    pub rcv_time: DateTime<Utc>,
    /// Time the server sent the reply.
    pub reply_time: DateTime<Utc>,
    /// Echoed client request handle.
    pub client_request_handle: Option<String>,
    /// Locale the server actually used.
    pub revised_locale_id: Option<String>,
    /// Server state at reply time.
    pub server_state: ServerState,
}

impl ReplyBase {
    /// Creates a reply header stamped with `time` for both receive and reply.
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            rcv_time: time,
            reply_time: time,
            client_request_handle: None,
            revised_locale_id: None,
            server_state: ServerState::Running,
        }
    }
}

/// Error description referenced by item result codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcError {
    /// Result code.
    pub id: ResultCode,
    /// Error text.
    pub text: Option<String>,
}

impl OpcError {
    /// Creates an error description.
    pub fn new(id: impl Into<ResultCode>, text: Option<String>) -> Self {
        Self {
            id: id.into(),
            text,
        }
    }
}

/// Finds the text for `code` among the reply's error descriptions.
pub fn error_text(errors: &[OpcError], code: &ResultCode) -> Option<String> {
    errors
        .iter()
        .find(|e| &e.id == code)
        .and_then(|e| e.text.clone())
}

/// A value of one item as carried by Read, Write, Subscribe and
/// SubscriptionPolledRefresh.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ItemValue {
    /// Item identity. The name is empty when the server omits it.
    pub item: ItemIdentity,
    /// Echoed client handle.
    pub client_item_handle: Option<ClientItemHandle>,
    /// Server-assigned item handle (subscription replies only).
    pub server_item_handle: Option<ServerItemHandle>,
    /// Value, absent on failure.
    pub value: Option<Value>,
    /// Quality, absent when the server omits it (implies good).
    pub quality: Option<Quality>,
    /// Source timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// Result code, absent on plain success.
    pub result_code: Option<ResultCode>,
    /// Diagnostic information.
    pub diagnostic_info: Option<String>,
}

impl ItemValue {
    /// Creates an empty item value for `item`.
    pub fn new(item: impl Into<ItemIdentity>) -> Self {
        Self {
            item: item.into(),
            ..Default::default()
        }
    }

    /// Sets the value.
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Sets the quality.
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Sets the source timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the client handle.
    pub fn with_client_handle(mut self, handle: impl Into<ClientItemHandle>) -> Self {
        self.client_item_handle = Some(handle.into());
        self
    }

    /// Sets the server handle.
    pub fn with_server_handle(mut self, handle: impl Into<ServerItemHandle>) -> Self {
        self.server_item_handle = Some(handle.into());
        self
    }

    /// Sets the result code.
    pub fn with_result(mut self, code: impl Into<ResultCode>) -> Self {
        self.result_code = Some(code.into());
        self
    }

    /// Returns the failure code, if the item failed.
    pub fn failure(&self) -> Option<&ResultCode> {
        self.result_code.as_ref().filter(|c| c.is_error())
    }
}

// =============================================================================
// Read
// =============================================================================

/// One item of a Read request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequestItem {
    /// Item to read.
    pub item: ItemIdentity,
    /// Client handle echoed in the reply.
    pub client_item_handle: Option<ClientItemHandle>,
    /// Oldest acceptable cached value.
    pub max_age: Option<Duration>,
}

/// Read request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadRequest {
    /// Common options.
    pub options: RequestOptions,
    /// Default max age for all items.
    pub max_age: Option<Duration>,
    /// Items to read.
    pub items: Vec<ReadRequestItem>,
}

/// Read response.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResponse {
    /// Reply header.
    pub reply: ReplyBase,
    /// Item values in request order.
    pub items: Vec<ItemValue>,
    /// Error descriptions referenced by item result codes.
    pub errors: Vec<OpcError>,
}

// =============================================================================
// Write
// =============================================================================

/// Write request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteRequest {
    /// Common options.
    pub options: RequestOptions,
    /// Values to write.
    pub items: Vec<ItemValue>,
    /// Ask the server to read back the written values.
    pub return_values_on_reply: bool,
}

/// Write response.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteResponse {
    /// Reply header.
    pub reply: ReplyBase,
    /// Per-item results.
    pub items: Vec<ItemValue>,
    /// Error descriptions referenced by item result codes.
    pub errors: Vec<OpcError>,
}

// =============================================================================
// Subscribe
// =============================================================================

/// One item of a Subscribe request.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeRequestItem {
    /// Item to subscribe.
    pub item: ItemIdentity,
    /// Client handle.
    pub client_item_handle: ClientItemHandle,
    /// Per-item sampling rate.
    pub requested_sampling_rate: Option<Duration>,
    /// Per-item percent deadband.
    pub deadband: Option<f32>,
    /// Per-item buffering.
    pub enable_buffering: Option<bool>,
}

/// Subscribe request.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeRequest {
    /// Common options.
    pub options: RequestOptions,
    /// Items.
    pub items: Vec<SubscribeRequestItem>,
    /// Requested update rate for the whole subscription.
    pub requested_sampling_rate: Duration,
    /// Percent deadband for the whole subscription.
    pub deadband: Option<f32>,
    /// Buffering for the whole subscription.
    pub enable_buffering: bool,
    /// The subscription expires when not polled within this window.
    pub subscription_ping_rate: Duration,
    /// Return initial values in the reply.
    pub return_values_on_reply: bool,
}

/// Per-item result of a Subscribe.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeItemResult {
    /// Initial value or failure of the item.
    pub item_value: ItemValue,
    /// Rate the server will actually sample this item at.
    pub revised_sampling_rate: Option<Duration>,
}

/// Subscribe response.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeResponse {
    /// Reply header.
    pub reply: ReplyBase,
    /// Handle of the new subscription. Absent when every item failed.
    pub server_sub_handle: Option<ServerSubHandle>,
    /// Per-item results.
    pub items: Vec<SubscribeItemResult>,
    /// Rate the server will actually use for the subscription.
    pub revised_sampling_rate: Option<Duration>,
    /// Error descriptions referenced by item result codes.
    pub errors: Vec<OpcError>,
}

// =============================================================================
// SubscriptionPolledRefresh
// =============================================================================

/// SubscriptionPolledRefresh request.
#[derive(Debug, Clone, PartialEq)]
pub struct PolledRefreshRequest {
    /// Common options.
    pub options: RequestOptions,
    /// Subscriptions to poll.
    pub server_sub_handles: Vec<ServerSubHandle>,
    /// Minimum time the server holds the request.
    pub hold_time: Option<Duration>,
    /// Additional time the server waits for a change.
    pub wait_time: Option<Duration>,
    /// Return every item rather than only changes since the last poll.
    pub return_all_items: bool,
}

/// Changed items of one subscription in a polled refresh reply.
#[derive(Debug, Clone, PartialEq)]
pub struct PolledItemList {
    /// Subscription the items belong to.
    pub server_sub_handle: Option<ServerSubHandle>,
    /// Changed items.
    pub items: Vec<ItemValue>,
}

/// SubscriptionPolledRefresh response.
#[derive(Debug, Clone, PartialEq)]
pub struct PolledRefreshResponse {
    /// Reply header.
    pub reply: ReplyBase,
    /// Handles the server no longer knows.
    pub invalid_server_sub_handles: Vec<ServerSubHandle>,
    /// Changed items per subscription.
    pub item_lists: Vec<PolledItemList>,
    /// Error descriptions referenced by item result codes.
    pub errors: Vec<OpcError>,
    /// The server dropped buffered values.
    pub data_buffer_overflow: bool,
    /// Rate revision announced with this reply.
    pub revised_sampling_rate: Option<Duration>,
}

// =============================================================================
// SubscriptionCancel
// =============================================================================

/// SubscriptionCancel request.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelRequest {
    /// Subscription to cancel.
    pub server_sub_handle: ServerSubHandle,
    /// Echoed in the reply.
    pub client_request_handle: Option<String>,
}

/// SubscriptionCancel response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CancelResponse {
    /// Echoed client request handle.
    pub client_request_handle: Option<String>,
}

// =============================================================================
// GetStatus
// =============================================================================

/// GetStatus request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetStatusRequest {
    /// Common options.
    pub options: RequestOptions,
}

/// Static and dynamic server information.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Server start time.
    pub start_time: Option<DateTime<Utc>>,
    /// Product version string.
    pub product_version: Option<String>,
    /// Status text.
    pub status_info: Option<String>,
    /// Vendor text.
    pub vendor_info: Option<String>,
    /// Locales the server supports.
    pub supported_locale_ids: Vec<String>,
    /// Interface versions the server supports.
    pub supported_interface_versions: Vec<String>,
}

/// GetStatus response.
#[derive(Debug, Clone, PartialEq)]
pub struct GetStatusResponse {
    /// Reply header (carries the server state).
    pub reply: ReplyBase,
    /// Server information.
    pub status: Option<ServerStatus>,
}

// =============================================================================
// GetProperties
// =============================================================================

/// GetProperties request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetPropertiesRequest {
    /// Common options.
    pub options: RequestOptions,
    /// Items to query.
    pub items: Vec<ItemIdentity>,
    /// Property names to return. Ignored when `return_all_properties` is set.
    pub property_names: Vec<String>,
    /// Return every property.
    pub return_all_properties: bool,
    /// Return property values, not just names.
    pub return_property_values: bool,
}

/// One property of an item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemProperty {
    /// Property name (e.g. `dataType`, `euUnits`).
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Value, when requested.
    pub value: Option<Value>,
    /// Item exposing this property as its own item.
    pub item: Option<ItemIdentity>,
    /// Result code.
    pub result_code: Option<ResultCode>,
}

/// Properties of one item.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyReplyList {
    /// Item the properties belong to.
    pub item: ItemIdentity,
    /// Properties.
    pub properties: Vec<ItemProperty>,
    /// Result code for the whole item.
    pub result_code: Option<ResultCode>,
}

/// GetProperties response.
#[derive(Debug, Clone, PartialEq)]
pub struct GetPropertiesResponse {
    /// Reply header.
    pub reply: ReplyBase,
    /// Property lists in request order.
    pub property_lists: Vec<PropertyReplyList>,
    /// Error descriptions referenced by result codes.
    pub errors: Vec<OpcError>,
}

// =============================================================================
// Browse
// =============================================================================

/// Which elements a Browse returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowseFilter {
    /// Branches and items.
    #[default]
    All,
    /// Branches only.
    Branch,
    /// Items only.
    Item,
}

/// Browse request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BrowseRequest {
    /// Common options.
    pub options: RequestOptions,
    /// Element to browse; an empty name browses the root.
    pub item: ItemIdentity,
    /// Continuation point from a previous reply.
    pub continuation_point: Option<String>,
    /// Maximum elements per reply (0 = server default).
    pub max_elements_returned: u32,
    /// Element kind filter.
    pub browse_filter: BrowseFilter,
    /// Name pattern.
    pub element_name_filter: Option<String>,
    /// Vendor-specific filter.
    pub vendor_filter: Option<String>,
    /// Property names to return for each element.
    pub property_names: Vec<String>,
    /// Return every property.
    pub return_all_properties: bool,
    /// Return property values.
    pub return_property_values: bool,
}

impl BrowseRequest {
    /// Creates a request browsing `item` with default options.
    pub fn new(item: ItemIdentity) -> Self {
        Self {
            item,
            ..Default::default()
        }
    }

    /// Sets the element kind filter.
    pub fn with_filter(mut self, filter: BrowseFilter) -> Self {
        self.browse_filter = filter;
        self
    }

    /// Sets the page size.
    pub fn with_max_elements(mut self, max: u32) -> Self {
        self.max_elements_returned = max;
        self
    }
}

/// One element of a Browse reply.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseElement {
    /// Display name.
    pub name: String,
    /// Identity usable for Read/Subscribe.
    pub item: ItemIdentity,
    /// The element carries data.
    pub is_item: bool,
    /// The element has children.
    pub has_children: bool,
    /// Requested properties.
    pub properties: Vec<ItemProperty>,
}

/// Browse response.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseResponse {
    /// Reply header.
    pub reply: ReplyBase,
    /// Elements of this page.
    pub elements: Vec<BrowseElement>,
    /// Continuation point for the next page.
    pub continuation_point: Option<String>,
    /// More elements exist than were returned.
    pub more_elements: bool,
    /// Error descriptions.
    pub errors: Vec<OpcError>,
}

// =============================================================================
// Request / Response
// =============================================================================

/// A request of any operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Read.
    Read(ReadRequest),
    /// Write.
    Write(WriteRequest),
    /// Subscribe.
    Subscribe(SubscribeRequest),
    /// SubscriptionPolledRefresh.
    PolledRefresh(PolledRefreshRequest),
    /// SubscriptionCancel.
    Cancel(CancelRequest),
    /// GetStatus.
    GetStatus(GetStatusRequest),
    /// GetProperties.
    GetProperties(GetPropertiesRequest),
    /// Browse.
    Browse(BrowseRequest),
}

impl Request {
    /// Returns the operation of this request.
    pub fn operation(&self) -> Operation {
        match self {
            Self::Read(_) => Operation::Read,
            Self::Write(_) => Operation::Write,
            Self::Subscribe(_) => Operation::Subscribe,
            Self::PolledRefresh(_) => Operation::SubscriptionPolledRefresh,
            Self::Cancel(_) => Operation::SubscriptionCancel,
            Self::GetStatus(_) => Operation::GetStatus,
            Self::GetProperties(_) => Operation::GetProperties,
            Self::Browse(_) => Operation::Browse,
        }
    }
}

/// A response of any operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Read.
    Read(ReadResponse),
    /// Write.
    Write(WriteResponse),
    /// Subscribe.
    Subscribe(SubscribeResponse),
    /// SubscriptionPolledRefresh.
    PolledRefresh(PolledRefreshResponse),
    /// SubscriptionCancel.
    Cancel(CancelResponse),
    /// GetStatus.
    GetStatus(GetStatusResponse),
    /// GetProperties.
    GetProperties(GetPropertiesResponse),
    /// Browse.
    Browse(BrowseResponse),
}

impl Response {
    /// Returns the operation of this response.
    pub fn operation(&self) -> Operation {
        match self {
            Self::Read(_) => Operation::Read,
            Self::Write(_) => Operation::Write,
            Self::Subscribe(_) => Operation::Subscribe,
            Self::PolledRefresh(_) => Operation::SubscriptionPolledRefresh,
            Self::Cancel(_) => Operation::SubscriptionCancel,
            Self::GetStatus(_) => Operation::GetStatus,
            Self::GetProperties(_) => Operation::GetProperties,
            Self::Browse(_) => Operation::Browse,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::SubscriptionPolledRefresh.to_string(), "SubscriptionPolledRefresh");
        assert_eq!(Operation::ALL.len(), 8);
    }

    #[test]
    fn test_request_operation() {
        let request = Request::Cancel(CancelRequest {
            server_sub_handle: ServerSubHandle::from("S1"),
            client_request_handle: None,
        });
        assert_eq!(request.operation(), Operation::SubscriptionCancel);

        let response = Response::Cancel(CancelResponse::default());
        assert_eq!(response.operation(), request.operation());
    }

    #[test]
    fn test_item_value_failure() {
        let ok = ItemValue::new("A").with_value(1i32).with_result(ResultCode::S_CLAMP);
        assert!(ok.failure().is_none());

        let failed = ItemValue::new("B").with_result(ResultCode::E_UNKNOWNITEMNAME);
        assert_eq!(failed.failure().map(|c| c.as_str()), Some("E_UNKNOWNITEMNAME"));
    }

    #[test]
    fn test_error_text_lookup() {
        let errors = vec![
            OpcError::new(ResultCode::E_FAIL, None),
            OpcError::new(ResultCode::E_UNKNOWNITEMNAME, Some("no such item".to_string())),
        ];
        assert_eq!(
            error_text(&errors, &ResultCode::new(ResultCode::E_UNKNOWNITEMNAME)).as_deref(),
            Some("no such item")
        );
        assert_eq!(error_text(&errors, &ResultCode::new(ResultCode::E_FAIL)), None);
    }
}
