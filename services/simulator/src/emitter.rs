//! Status emission: notification builders, the periodic broadcast schedule
//! and targeted responses.
//!
//! Subsystems broadcast on a coprime pattern against a 1 s tick (mount every
//! tick, focuser every 2, camera every 3, task controller every 5,
//! environment/disk every 10, dew heater every 15, orientation every 30),
//! each group staggered a few milliseconds so one tick never emits
//! everything in a single indivisible step.

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use origin_protocol::{
    subsystems, CalibrationNotification, CameraParams, DewHeaterStatus, DirectoryContentsResponse,
    DirectoryListResponse, DiskStatus, Envelope, EnvironmentStatus, FocuserStatus,
    InitializationInfo, ModelResponse, MountStatus, NewImageReady, OrientationStatus,
    TaskControllerStatus, VersionResponse, MODEL_DEVICES,
};

use crate::connection::Outbound;
use crate::core::{Core, CoreEvent, StatusGroup};
use crate::state::{TaskStage, TaskState, VERSION_NUMBER, VERSION_STRING};

/// Where an emission goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    /// All live connections, as a notification.
    Broadcast,
    /// One connection, still as a notification (initial burst).
    Client(u64),
    /// One connection, as the response to an inbound command.
    Response {
        conn_id: u64,
        sequence_id: i64,
        destination: String,
    },
}

/// Groups due on a given tick counter.
pub(crate) fn due_groups(counter: u64) -> Vec<StatusGroup> {
    let mut due = vec![StatusGroup::Mount];
    if counter % 2 == 0 {
        due.push(StatusGroup::Focuser);
    }
    if counter % 3 == 0 {
        due.push(StatusGroup::Camera);
    }
    if counter % 10 == 0 {
        due.push(StatusGroup::EnvironmentDisk);
    }
    if counter % 15 == 0 {
        due.push(StatusGroup::DewHeater);
    }
    if counter % 30 == 0 {
        due.push(StatusGroup::Orientation);
    }
    if counter % 5 == 0 {
        due.push(StatusGroup::TaskController);
    }
    due
}

/// Per-group stagger inside one tick.
fn stagger(group: StatusGroup) -> Duration {
    let ms = match group {
        StatusGroup::Mount => 0,
        StatusGroup::Focuser => 5,
        StatusGroup::Camera => 10,
        StatusGroup::EnvironmentDisk => 15,
        StatusGroup::DewHeater => 20,
        StatusGroup::Orientation => 25,
        StatusGroup::TaskController => 30,
    };
    Duration::from_millis(ms)
}

impl Core {
    pub(crate) fn on_emit_tick(&mut self) {
        self.emit_counter += 1;
        for group in due_groups(self.emit_counter) {
            self.schedule(stagger(group), CoreEvent::Emit(group));
        }
        // Bounded so the counter pattern repeats instead of overflowing.
        if self.emit_counter > 1000 {
            self.emit_counter = 0;
        }
    }

    pub(crate) fn handle_emit(&mut self, group: StatusGroup) {
        match group {
            StatusGroup::Mount => self.send_mount_status(Target::Broadcast),
            StatusGroup::Focuser => self.send_focuser_status(Target::Broadcast),
            StatusGroup::Camera => {
                self.send_camera_params(Target::Broadcast);
                self.send_new_image_ready(Target::Broadcast);
            }
            StatusGroup::EnvironmentDisk => {
                self.send_environment_status(Target::Broadcast);
                self.send_disk_status(Target::Broadcast);
            }
            StatusGroup::DewHeater => self.send_dew_heater_status(Target::Broadcast),
            StatusGroup::Orientation => self.send_orientation_status(Target::Broadcast),
            StatusGroup::TaskController => self.send_task_status(Target::Broadcast),
        }
    }

    /// The batch of notifications a freshly connected client receives.
    pub(crate) fn send_initial_burst(&mut self, conn_id: u64) {
        if !self.connections.contains_key(&conn_id) {
            return;
        }
        self.send_mount_status(Target::Client(conn_id));
        self.send_focuser_status(Target::Client(conn_id));
        self.send_camera_params(Target::Client(conn_id));
        self.send_disk_status(Target::Client(conn_id));
        self.send_task_status(Target::Client(conn_id));
        self.send_environment_status(Target::Client(conn_id));
        self.send_dew_heater_status(Target::Client(conn_id));
        self.send_orientation_status(Target::Client(conn_id));
    }

    // -- envelope helpers --

    fn envelope_for(&mut self, target: &Target, source: &str, command: Option<&str>) -> Envelope {
        match target {
            Target::Response {
                sequence_id,
                destination,
                ..
            } => Envelope {
                command: command.map(str::to_owned),
                destination: destination.clone(),
                source: source.to_owned(),
                sequence_id: *sequence_id,
                message_type: origin_protocol::MessageType::Response,
                expired_at: self.clock.expired_at(),
                error_code: Some(0),
                error_message: Some(String::new()),
            },
            Target::Broadcast | Target::Client(_) => {
                let sequence_id = self.state.next_sequence_id();
                let mut envelope = Envelope::notification(source, sequence_id, self.clock.expired_at());
                envelope.command = command.map(str::to_owned);
                envelope
            }
        }
    }

    // -- delivery --

    pub(crate) fn deliver(&self, target: &Target, value: &Value) {
        match target {
            Target::Broadcast => self.broadcast_value(value),
            Target::Client(conn_id)
            | Target::Response {
                conn_id, ..
            } => {
                if let Some(handle) = self.connections.get(conn_id) {
                    push(handle, value);
                }
            }
        }
    }

    pub(crate) fn broadcast_value(&self, value: &Value) {
        for handle in self.connections.values() {
            push(handle, value);
        }
    }

    // -- subsystem status builders --

    pub(crate) fn send_mount_status(&mut self, target: Target) {
        let now_ms = self.clock.now_ms();
        self.state.advance_celestial(now_ms, &mut self.rng);
        self.send_mount_status_unadvanced(target);
    }

    /// Mount status from the state as-is.  The slew-completion broadcast
    /// uses this so clients see the exact target coordinates before
    /// tracking drift resumes.
    pub(crate) fn send_mount_status_unadvanced(&mut self, target: Target) {
        let envelope = self.envelope_for(&target, subsystems::MOUNT, Some("GetStatus"));
        let status = MountStatus {
            envelope,
            battery_level: self.state.battery_level.as_str().to_owned(),
            battery_voltage: self.state.battery_voltage,
            charger_status: self.state.charger_status.clone(),
            date: self.clock.date_string(),
            time: self.clock.time_string(),
            time_zone: self.state.time_zone.clone(),
            latitude: self.state.latitude,
            longitude: self.state.longitude,
            ra: self.state.ra,
            dec: self.state.dec,
            is_aligned: self.state.is_aligned,
            is_goto_over: self.state.is_goto_over,
            is_tracking: self.state.is_tracking,
            num_align_refs: self.state.num_align_refs,
            enc0: self.state.enc0,
            enc1: self.state.enc1,
        };
        self.deliver_serialized(&target, &status);
    }

    pub(crate) fn send_focuser_status(&mut self, target: Target) {
        let command = response_only_command(&target, "GetStatus");
        let envelope = self.envelope_for(&target, subsystems::FOCUSER, command);
        let status = FocuserStatus {
            envelope,
            backlash: self.state.backlash,
            calibration_lower_limit: self.state.calibration_lower_limit,
            calibration_upper_limit: self.state.calibration_upper_limit,
            is_calibration_complete: self.state.is_calibration_complete,
            is_move_to_over: self.state.is_move_to_over,
            need_auto_focus: self.state.need_auto_focus,
            percentage_calibration_complete: self.state.percentage_calibration_complete,
            position: self.state.position,
            requires_calibration: self.state.requires_calibration,
            velocity: self.state.velocity,
        };
        self.deliver_serialized(&target, &status);
    }

    pub(crate) fn send_camera_params(&mut self, target: Target) {
        let command = response_only_command(&target, "GetCaptureParameters");
        let envelope = self.envelope_for(&target, subsystems::CAMERA, command);
        let params = CameraParams {
            envelope,
            binning: self.state.binning,
            bit_depth: self.state.bit_depth,
            color_b_balance: self.state.color_b_balance,
            color_g_balance: self.state.color_g_balance,
            color_r_balance: self.state.color_r_balance,
            exposure: self.state.exposure,
            iso: self.state.iso,
            offset: self.state.offset,
        };
        self.deliver_serialized(&target, &params);
    }

    pub(crate) fn send_environment_status(&mut self, target: Target) {
        self.state.advance_environment(&mut self.rng);
        let command = response_only_command(&target, "GetStatus");
        let envelope = self.envelope_for(&target, subsystems::ENVIRONMENT, command);
        let status = EnvironmentStatus {
            envelope,
            ambient_temperature: self.state.ambient_temperature,
            camera_temperature: self.state.camera_temperature,
            cpu_fan_on: self.state.cpu_fan_on,
            cpu_temperature: self.state.cpu_temperature,
            dew_point: self.state.dew_point,
            front_cell_temperature: self.state.front_cell_temperature,
            humidity: self.state.humidity,
            ota_fan_on: self.state.ota_fan_on,
            recalibrating: self.state.recalibrating,
        };
        self.deliver_serialized(&target, &status);
    }

    pub(crate) fn send_disk_status(&mut self, target: Target) {
        self.state.update_disk_space(&mut self.rng);
        let envelope = self.envelope_for(&target, subsystems::DISK, Some("GetStatus"));
        let status = DiskStatus {
            envelope,
            capacity: self.state.capacity,
            free_bytes: self.state.free_bytes,
            level: self.state.disk_level.clone(),
        };
        self.deliver_serialized(&target, &status);
    }

    pub(crate) fn send_dew_heater_status(&mut self, target: Target) {
        let envelope = self.envelope_for(&target, subsystems::DEW_HEATER, Some("GetStatus"));
        let status = DewHeaterStatus {
            envelope,
            aggression: self.state.aggression,
            heater_level: self.state.heater_level,
            manual_power_level: self.state.manual_power_level,
            mode: self.state.heater_mode.clone(),
        };
        self.deliver_serialized(&target, &status);
    }

    pub(crate) fn send_orientation_status(&mut self, target: Target) {
        self.state.advance_environment(&mut self.rng);
        let envelope = self.envelope_for(&target, subsystems::ORIENTATION_SENSOR, Some("GetStatus"));
        let status = OrientationStatus {
            envelope,
            altitude: self.state.altitude,
        };
        self.deliver_serialized(&target, &status);
    }

    pub(crate) fn send_task_status(&mut self, target: Target) {
        let envelope = self.envelope_for(&target, subsystems::TASK_CONTROLLER, Some("GetStatus"));
        let mut initialization_info = None;
        let mut is_fake_initialized = None;
        if self.state.task_state == TaskState::Initializing {
            initialization_info = Some(InitializationInfo {
                num_points: self.state.init_info.num_points,
                position_of_focus: self.state.init_info.position_of_focus,
                num_points_remaining: self.state.init_info.num_points_remaining,
                percent_complete: self.state.init_info.percent_complete,
            });
            if self.state.stage == TaskStage::Complete || self.state.task_state == TaskState::Idle {
                is_fake_initialized = Some(self.state.is_fake_initialized);
            }
        }
        let status = TaskControllerStatus {
            envelope,
            is_ready: self.state.is_ready,
            stage: self.state.stage.as_str().to_owned(),
            state: self.state.task_state.as_str().to_owned(),
            initialization_info,
            is_fake_initialized,
        };
        self.deliver_serialized(&target, &status);
    }

    /// `NewImageReady`: advance the sky simulation, cycle the preview
    /// filename and notify.  Fires from the emitter even when the provider
    /// produced nothing new, which real clients rely on.
    pub(crate) fn send_new_image_ready(&mut self, target: Target) {
        let now_ms = self.clock.now_ms();
        self.state.advance_celestial(now_ms, &mut self.rng);
        self.state.file_location = self.state.next_image_file();
        let envelope = self.envelope_for(&target, subsystems::IMAGE_SERVER, Some("NewImageReady"));
        let notification = NewImageReady {
            envelope,
            dec: self.state.dec,
            fov_x: self.state.fov_x,
            fov_y: self.state.fov_y,
            orientation: self.state.orientation,
            image_type: self.state.image_type.as_str().to_owned(),
            file_location: self.state.file_location.clone(),
        };
        self.deliver_serialized(&target, &notification);
    }

    // -- fixed-content responses --

    pub(crate) fn send_version(&mut self, target: Target) {
        let envelope = self.envelope_for(&target, subsystems::SYSTEM, Some("GetVersion"));
        let response = VersionResponse {
            envelope,
            number: VERSION_NUMBER.to_owned(),
            version: VERSION_STRING.to_owned(),
        };
        self.deliver_serialized(&target, &response);
    }

    pub(crate) fn send_model(&mut self, target: Target) {
        let envelope = self.envelope_for(&target, subsystems::SYSTEM, Some("GetModel"));
        let response = ModelResponse {
            envelope,
            value: "Origin".to_owned(),
            devices: MODEL_DEVICES.iter().map(|d| (*d).to_owned()).collect(),
        };
        self.deliver_serialized(&target, &response);
    }

    pub(crate) fn send_directory_list(&mut self, target: Target) {
        let envelope = self.envelope_for(
            &target,
            subsystems::IMAGE_SERVER,
            Some("GetListOfAvailableDirectories"),
        );
        let response = DirectoryListResponse {
            envelope,
            directory_list: self.state.astrophotography_dirs.clone(),
        };
        self.deliver_serialized(&target, &response);
    }

    pub(crate) fn send_directory_contents(&mut self, target: Target) {
        let envelope = self.envelope_for(&target, subsystems::IMAGE_SERVER, Some("GetDirectoryContents"));
        let response = DirectoryContentsResponse {
            envelope,
            file_list: [
                "frame_1.jpg",
                "frame_2.jpg",
                "frame_3.jpg",
                "FinalStackedMaster.tiff",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),
        };
        self.deliver_serialized(&target, &response);
    }

    /// Factory calibration: an empty response plus a calibration
    /// notification to the same client.
    pub(crate) fn send_calibration_status(&mut self, target: Target) {
        let envelope = self.envelope_for(&target, subsystems::FACTORY_CALIBRATION, Some("GetStatus"));
        self.deliver(&target, &serde_json::to_value(&envelope).unwrap_or_default());

        let conn_id = match &target {
            Target::Response { conn_id, .. } | Target::Client(conn_id) => *conn_id,
            Target::Broadcast => return,
        };
        let notify_target = Target::Client(conn_id);
        let envelope = self.envelope_for(&notify_target, subsystems::FACTORY_CALIBRATION, None);
        let notification = CalibrationNotification {
            envelope,
            is_calibrated: self.state.is_factory_calibrated,
            num_times_collimated: self.state.num_times_collimated,
            num_times_hot_spot_centered: self.state.num_times_hot_spot_centered,
            completed_phases: self.state.completed_phases.clone(),
            current_phase: self.state.current_phase.clone(),
        };
        self.deliver_serialized(&notify_target, &notification);
    }

    fn deliver_serialized(&self, target: &Target, message: &impl serde::Serialize) {
        match serde_json::to_value(message) {
            Ok(value) => self.deliver(target, &value),
            Err(e) => warn!(error = %e, "failed to serialize status message"),
        }
    }
}

/// Responses carry a `Command` field even where the matching notification
/// does not (focuser, camera, environment).
fn response_only_command<'a>(target: &Target, command: &'a str) -> Option<&'a str> {
    matches!(target, Target::Response { .. }).then_some(command)
}

/// A send failure on one connection is never fatal; the heartbeat decides
/// whether the connection survives.
fn push(handle: &crate::core::ClientHandle, value: &Value) {
    if let Err(e) = handle.outbound.try_send(Outbound::Text(value.to_string())) {
        warn!(conn_id = handle.conn_id, error = %e, "dropping outbound message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{attach_client, core_fixture, drain_json};
    use crate::core::StatusGroup;

    #[test]
    fn mount_is_due_every_tick_and_orientation_every_thirtieth() {
        for counter in 1..=1000u64 {
            let due = due_groups(counter);
            assert_eq!(due[0], StatusGroup::Mount);
            assert_eq!(due.contains(&StatusGroup::Focuser), counter % 2 == 0);
            assert_eq!(due.contains(&StatusGroup::Camera), counter % 3 == 0);
            assert_eq!(due.contains(&StatusGroup::EnvironmentDisk), counter % 10 == 0);
            assert_eq!(due.contains(&StatusGroup::DewHeater), counter % 15 == 0);
            assert_eq!(due.contains(&StatusGroup::Orientation), counter % 30 == 0);
            assert_eq!(due.contains(&StatusGroup::TaskController), counter % 5 == 0);
        }
    }

    #[tokio::test]
    async fn broadcast_notifications_reach_every_client_in_order() {
        let (mut core, _events) = core_fixture();
        let mut first = attach_client(&mut core, 1);
        let mut second = attach_client(&mut core, 2);

        core.send_mount_status(Target::Broadcast);
        core.send_mount_status(Target::Broadcast);

        for rx in [&mut first, &mut second] {
            let seen = drain_json(rx);
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[0]["Source"], "Mount");
            assert_eq!(seen[0]["Type"], "Notification");
            assert_eq!(seen[0]["Destination"], "All");
            assert!(seen[1]["SequenceID"].as_i64() > seen[0]["SequenceID"].as_i64());
        }
    }

    #[tokio::test]
    async fn mount_notification_reports_coordinates_and_flags() {
        let (mut core, _events) = core_fixture();
        let mut rx = attach_client(&mut core, 1);

        core.send_mount_status(Target::Broadcast);
        let seen = drain_json(&mut rx);
        let mount = &seen[0];
        assert!(mount["Ra"].is_number());
        assert!(mount["Dec"].is_number());
        assert_eq!(mount["IsAligned"], false);
        assert_eq!(mount["IsGotoOver"], true);
        assert_eq!(mount["Command"], "GetStatus");
        assert_eq!(mount["BatteryLevel"], "HIGH");
    }

    #[tokio::test]
    async fn focuser_notification_has_no_command_but_its_response_does() {
        let (mut core, _events) = core_fixture();
        let mut rx = attach_client(&mut core, 1);

        core.send_focuser_status(Target::Broadcast);
        core.send_focuser_status(Target::Response {
            conn_id: 1,
            sequence_id: 9,
            destination: "App".to_owned(),
        });

        let seen = drain_json(&mut rx);
        assert!(seen[0].get("Command").is_none());
        assert_eq!(seen[0]["Type"], "Notification");
        assert_eq!(seen[1]["Command"], "GetStatus");
        assert_eq!(seen[1]["Type"], "Response");
        assert_eq!(seen[1]["SequenceID"], 9);
        assert_eq!(seen[1]["Destination"], "App");
        assert_eq!(seen[1]["ErrorCode"], 0);
    }

    #[tokio::test]
    async fn new_image_ready_cycles_the_preview_filename() {
        let (mut core, _events) = core_fixture();
        let mut rx = attach_client(&mut core, 1);

        core.send_new_image_ready(Target::Broadcast);
        core.send_new_image_ready(Target::Broadcast);
        let seen = drain_json(&mut rx);
        assert_eq!(seen[0]["FileLocation"], "Images/Temp/1.jpg");
        assert_eq!(seen[1]["FileLocation"], "Images/Temp/2.jpg");
        assert_eq!(seen[0]["Command"], "NewImageReady");
        assert_eq!(seen[0]["Source"], "ImageServer");
        assert_eq!(seen[0]["ImageType"], "LIVE");
    }

    #[tokio::test]
    async fn initial_burst_sends_the_eight_subsystem_snapshots() {
        let (mut core, _events) = core_fixture();
        let mut rx = attach_client(&mut core, 1);

        core.send_initial_burst(1);
        let seen = drain_json(&mut rx);
        let sources: Vec<&str> = seen.iter().filter_map(|v| v["Source"].as_str()).collect();
        assert_eq!(
            sources,
            [
                "Mount",
                "Focuser",
                "Camera",
                "Disk",
                "TaskController",
                "Environment",
                "DewHeater",
                "OrientationSensor",
            ]
        );
        assert!(seen.iter().all(|v| v["Type"] == "Notification"));
    }

    #[tokio::test]
    async fn task_status_only_carries_init_info_while_initializing() {
        let (mut core, _events) = core_fixture();
        let mut rx = attach_client(&mut core, 1);

        core.send_task_status(Target::Broadcast);
        core.state.task_state = crate::state::TaskState::Initializing;
        core.state.init_info.percent_complete = 50;
        core.send_task_status(Target::Broadcast);

        let seen = drain_json(&mut rx);
        assert!(seen[0].get("InitializationInfo").is_none());
        assert_eq!(seen[1]["InitializationInfo"]["PercentComplete"], 50);
        assert_eq!(seen[1]["State"], "INITIALIZING");
    }
}
