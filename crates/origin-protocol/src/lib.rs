// origin-protocol: SmartScope control protocol types and serialization.
//
// Every message on the wire is a flat JSON object sharing a common envelope
// (`Command`, `Destination`, `Source`, `SequenceID`, `Type`, `ExpiredAt`,
// `ErrorCode`, `ErrorMessage`) plus message-specific fields.  Status payloads
// flatten the envelope so the serialized object matches what real Origin
// firmware emits field-for-field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// WebSocket control endpoint served on the shared TCP port.
pub const MOUNT_CONTROL_ENDPOINT: &str = "/SmartScope-1.0/mountControlEndpoint";

/// HTTP path prefix for live preview images.
pub const TEMP_IMAGE_PREFIX: &str = "/SmartScope-1.0/dev2/Images/Temp/";

/// HTTP path marker for saved astrophotography images.
pub const ASTRO_IMAGE_MARKER: &str = "/SmartScope-1.0/dev2/Images/Astrophotography/";

/// Device list reported by `GetModel`.
pub const MODEL_DEVICES: [&str; 12] = [
    "System",
    "TaskController",
    "Imaging",
    "Mount",
    "Focuser",
    "Camera",
    "WiFi",
    "DewHeater",
    "Environment",
    "LedRing",
    "OrientationSensor",
    "Debug",
];

/// Subsystem names accepted in the `Destination` field.
pub mod subsystems {
    pub const SYSTEM: &str = "System";
    pub const TASK_CONTROLLER: &str = "TaskController";
    pub const MOUNT: &str = "Mount";
    pub const FOCUSER: &str = "Focuser";
    pub const CAMERA: &str = "Camera";
    pub const DEW_HEATER: &str = "DewHeater";
    pub const ENVIRONMENT: &str = "Environment";
    pub const LED_RING: &str = "LedRing";
    pub const ORIENTATION_SENSOR: &str = "OrientationSensor";
    pub const DEBUG: &str = "Debug";
    pub const DISK: &str = "Disk";
    pub const IMAGE_SERVER: &str = "ImageServer";
    pub const NETWORK: &str = "Network";
    pub const LIVE_STREAM: &str = "LiveStream";
    pub const FACTORY_CALIBRATION: &str = "FactoryCalibrationController";
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The `Type` field of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Command,
    Response,
    Notification,
    Error,
    Warning,
}

/// Common fields shared by every outbound message.
///
/// `command` is optional because some notifications (focuser, camera,
/// environment) go out without one, matching the device firmware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub destination: String,
    pub source: String,
    #[serde(rename = "SequenceID")]
    pub sequence_id: i64,
    #[serde(rename = "Type")]
    pub message_type: MessageType,
    pub expired_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Envelope {
    /// Successful response to an inbound command: `Source` and `Destination`
    /// swap, the sequence id is echoed.
    pub fn response(inbound: &CommandRecord, expired_at: i64) -> Self {
        Envelope {
            command: Some(inbound.command.clone()),
            destination: inbound.source.clone(),
            source: inbound.destination.clone(),
            sequence_id: inbound.sequence_id,
            message_type: MessageType::Response,
            expired_at,
            error_code: Some(0),
            error_message: Some(String::new()),
        }
    }

    /// Response carrying a non-zero error code.
    pub fn error_response(
        inbound: &CommandRecord,
        error_code: i64,
        error_message: &str,
        expired_at: i64,
    ) -> Self {
        Envelope {
            error_code: Some(error_code),
            error_message: Some(error_message.to_owned()),
            ..Envelope::response(inbound, expired_at)
        }
    }

    /// Broadcast notification from a subsystem.  Notifications never carry
    /// error fields.
    pub fn notification(source: &str, sequence_id: i64, expired_at: i64) -> Self {
        Envelope {
            command: None,
            destination: "All".to_owned(),
            source: source.to_owned(),
            sequence_id,
            message_type: MessageType::Notification,
            expired_at,
            error_code: None,
            error_message: None,
        }
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.command = Some(command.to_owned());
        self
    }
}

/// Merge message-specific fields into a serialized envelope.
///
/// `fields` must serialize to a JSON object; its entries are appended to the
/// envelope's.
pub fn with_fields(envelope: &Envelope, fields: Value) -> Value {
    let mut value = serde_json::to_value(envelope).unwrap_or_else(|_| Value::Object(Default::default()));
    if let (Value::Object(base), Value::Object(extra)) = (&mut value, fields) {
        base.extend(extra);
    }
    value
}

// ---------------------------------------------------------------------------
// Inbound command record
// ---------------------------------------------------------------------------

/// A parsed inbound command.  Unknown fields land in `payload` so handlers
/// can pick out command-specific parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandRecord {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub source: String,
    #[serde(rename = "SequenceID", default)]
    pub sequence_id: i64,
    #[serde(rename = "Type", default)]
    pub message_type: Option<String>,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

impl CommandRecord {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(Value::as_f64)
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.payload.get(key).and_then(Value::as_i64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(Value::as_bool)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Status payloads (subsystem -> client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountStatus {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub battery_level: String,
    pub battery_voltage: f64,
    pub charger_status: String,
    pub date: String,
    pub time: String,
    pub time_zone: String,
    pub latitude: f64,
    pub longitude: f64,
    pub ra: f64,
    pub dec: f64,
    pub is_aligned: bool,
    pub is_goto_over: bool,
    pub is_tracking: bool,
    pub num_align_refs: i64,
    pub enc0: f64,
    pub enc1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FocuserStatus {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub backlash: i64,
    pub calibration_lower_limit: i64,
    pub calibration_upper_limit: i64,
    pub is_calibration_complete: bool,
    pub is_move_to_over: bool,
    pub need_auto_focus: bool,
    pub percentage_calibration_complete: i64,
    pub position: i64,
    pub requires_calibration: bool,
    pub velocity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CameraParams {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub binning: i64,
    pub bit_depth: i64,
    pub color_b_balance: f64,
    pub color_g_balance: f64,
    pub color_r_balance: f64,
    pub exposure: f64,
    #[serde(rename = "ISO")]
    pub iso: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnvironmentStatus {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub ambient_temperature: f64,
    pub camera_temperature: f64,
    pub cpu_fan_on: bool,
    pub cpu_temperature: f64,
    pub dew_point: f64,
    pub front_cell_temperature: f64,
    pub humidity: f64,
    pub ota_fan_on: bool,
    pub recalibrating: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiskStatus {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub capacity: i64,
    pub free_bytes: i64,
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DewHeaterStatus {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub aggression: i64,
    pub heater_level: f64,
    pub manual_power_level: f64,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrientationStatus {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub altitude: i64,
}

/// Progress block embedded in task controller status while an
/// initialization is running.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitializationInfo {
    pub num_points: i64,
    pub position_of_focus: i64,
    pub num_points_remaining: i64,
    pub percent_complete: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskControllerStatus {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub is_ready: bool,
    pub stage: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialization_info: Option<InitializationInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_fake_initialized: Option<bool>,
}

/// `NewImageReady` notification.  Reports `Dec` but not `Ra`, like the
/// firmware does.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NewImageReady {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub dec: f64,
    pub fov_x: f64,
    pub fov_y: f64,
    pub orientation: f64,
    pub image_type: String,
    pub file_location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub number: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModelResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub value: String,
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CalibrationNotification {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub is_calibrated: bool,
    pub num_times_collimated: i64,
    pub num_times_hot_spot_centered: i64,
    pub completed_phases: Vec<String>,
    pub current_phase: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DirectoryListResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub directory_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DirectoryContentsResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub file_list: Vec<String>,
}
