//! Inbound command dispatch.
//!
//! Each text frame parses into a `CommandRecord` and routes on the
//! `(Command, Destination)` pair.  Handlers mutate state, queue exactly one
//! response, and may start a simulated activity.  Unknown commands get the
//! default success response; that is legacy device behavior, not an error.

use serde_json::json;
use tracing::{debug, info};

use origin_protocol::{subsystems, CommandRecord, Envelope};

use crate::astro;
use crate::core::Core;
use crate::emitter::Target;
use crate::state::{InitInfo, TaskStage, TaskState};

impl Core {
    pub(crate) fn dispatch_inbound(&mut self, conn_id: u64, text: &str) {
        let record = match CommandRecord::parse(text) {
            Ok(record) => record,
            Err(e) => {
                debug!(conn_id, error = %e, "ignoring unparseable control message");
                return;
            }
        };
        debug!(
            conn_id,
            command = %record.command,
            destination = %record.destination,
            sequence_id = record.sequence_id,
            "dispatching command"
        );
        self.dispatch_command(conn_id, record);
    }

    fn dispatch_command(&mut self, conn_id: u64, cmd: CommandRecord) {
        let snapshot = |cmd: &CommandRecord| Target::Response {
            conn_id,
            sequence_id: cmd.sequence_id,
            destination: cmd.source.clone(),
        };

        match (cmd.command.as_str(), cmd.destination.as_str()) {
            // Status snapshots answered straight from the emitter builders.
            ("GetStatus", subsystems::SYSTEM) | ("GetVersion", _) => {
                self.send_version(snapshot(&cmd));
            }
            ("GetStatus", subsystems::MOUNT) => self.send_mount_status(snapshot(&cmd)),
            ("GetStatus", subsystems::FOCUSER) => self.send_focuser_status(snapshot(&cmd)),
            ("GetStatus", subsystems::TASK_CONTROLLER) => self.send_task_status(snapshot(&cmd)),
            ("GetStatus", subsystems::DEW_HEATER) => self.send_dew_heater_status(snapshot(&cmd)),
            ("GetStatus", subsystems::ENVIRONMENT) => self.send_environment_status(snapshot(&cmd)),
            ("GetStatus", subsystems::ORIENTATION_SENSOR) => {
                self.send_orientation_status(snapshot(&cmd));
            }
            ("GetStatus", subsystems::DISK) => self.send_disk_status(snapshot(&cmd)),
            ("GetStatus", subsystems::FACTORY_CALIBRATION) => {
                self.send_calibration_status(snapshot(&cmd));
            }
            ("GetCaptureParameters", _) => self.send_camera_params(snapshot(&cmd)),
            ("GetFilter", _) => self.respond_with(conn_id, &cmd, json!({"Filter": "Clear"})),
            ("GetModel", _) => self.send_model(snapshot(&cmd)),

            // Initialization and alignment.
            ("RunInitialize", _) => self.handle_run_initialize(conn_id, &cmd),
            ("StartAlignment", _) => {
                self.state.is_aligned = false;
                self.state.num_align_refs = 0;
                self.respond_ok(conn_id, &cmd);
            }
            ("AddAlignmentPoint", _) => {
                self.state.num_align_refs += 1;
                self.respond_ok(conn_id, &cmd);
            }
            ("FinishAlignment", _) => {
                if self.state.num_align_refs >= 1 {
                    self.state.is_aligned = true;
                }
                self.respond_ok(conn_id, &cmd);
            }

            // Mount motion.
            ("GotoRaDec", _) => self.handle_goto(conn_id, &cmd),
            ("Slew", subsystems::MOUNT) => self.handle_jog(conn_id, &cmd),
            ("AbortAxisMovement", _) => {
                self.stop_slew();
                self.state.set_slewing(false);
                self.respond_ok(conn_id, &cmd);
            }
            ("StartTracking", _) => {
                self.state.is_tracking = true;
                self.respond_ok(conn_id, &cmd);
            }
            ("StopTracking", _) => {
                self.state.is_tracking = false;
                self.respond_ok(conn_id, &cmd);
            }

            // Imaging.
            ("RunImaging", _) => {
                self.state.is_imaging = true;
                self.state.imaging_time_left = 30;
                self.start_imaging();
                self.respond_ok(conn_id, &cmd);
            }
            ("CancelImaging", _) => {
                // The flag clears immediately; the imaging ticker runs out
                // on its own, still emitting NewImageReady until then.
                self.state.is_imaging = false;
                self.respond_ok(conn_id, &cmd);
            }

            // Focuser.
            ("MoveToPosition", subsystems::FOCUSER) => {
                if let Some(position) = cmd.i64("Position") {
                    self.state.position = position;
                }
                self.respond_ok(conn_id, &cmd);
            }
            ("SetBacklash", subsystems::FOCUSER) => {
                if let Some(backlash) = cmd.i64("Backlash") {
                    self.state.backlash = backlash;
                }
                self.respond_ok(conn_id, &cmd);
            }
            ("GetFocuserAdvancedSettings", subsystems::FOCUSER) => self.respond_with(
                conn_id,
                &cmd,
                json!({
                    "BacklashSteps": 255,
                    "DefaultSpeed": 250,
                    "DefaultAcceleration": 800,
                    "DirectionToggleDelayMs": 500,
                }),
            ),
            ("GetPositionLimits", subsystems::FOCUSER) => self.respond_with(
                conn_id,
                &cmd,
                json!({"MaximumPosition": 40000, "MinimumPosition": 0}),
            ),

            // Camera.
            ("SetCaptureParameters", _) => {
                if let Some(exposure) = cmd.f64("Exposure") {
                    self.state.exposure = exposure;
                }
                if let Some(iso) = cmd.i64("ISO") {
                    self.state.iso = iso;
                }
                if let Some(binning) = cmd.i64("Binning") {
                    self.state.binning = binning;
                }
                if let Some(offset) = cmd.i64("Offset") {
                    self.state.offset = offset;
                }
                if let Some(r) = cmd.f64("ColorRBalance") {
                    self.state.color_r_balance = r;
                }
                if let Some(g) = cmd.f64("ColorGBalance") {
                    self.state.color_g_balance = g;
                }
                if let Some(b) = cmd.f64("ColorBBalance") {
                    self.state.color_b_balance = b;
                }
                self.respond_ok(conn_id, &cmd);
            }
            ("GetCameraInfo", subsystems::CAMERA) => self.respond_with(
                conn_id,
                &cmd,
                json!({
                    "ModelName": "Origin Camera",
                    "SensorWidth": 14.8,
                    "SensorHeight": 11.1,
                    "PixelSize": 4.63,
                    "EffectiveFocalLength": 700,
                }),
            ),

            // Dew heater.
            ("SetMode", subsystems::DEW_HEATER) => {
                if let Some(mode) = cmd.text("Mode") {
                    self.state.heater_mode = mode.to_owned();
                }
                if let Some(aggression) = cmd.i64("Aggression") {
                    self.state.aggression = aggression;
                }
                if let Some(level) = cmd.f64("ManualPowerLevel") {
                    self.state.manual_power_level = level;
                }
                self.respond_ok(conn_id, &cmd);
            }

            // Image server.
            ("GetListOfAvailableDirectories", subsystems::IMAGE_SERVER) => {
                self.send_directory_list(snapshot(&cmd));
            }
            ("GetDirectoryContents", subsystems::IMAGE_SERVER) => {
                self.send_directory_contents(snapshot(&cmd));
            }

            // Environment and peripherals.
            ("GetSensors", subsystems::ENVIRONMENT) => self.respond_with(
                conn_id,
                &cmd,
                json!({
                    "Sensors": [
                        "AMBIENT_TEMPERATURE",
                        "HUMIDITY",
                        "DEW_POINT",
                        "FRONT_CELL_TEMPERATURE",
                        "CPU_TEMPERATURE",
                        "CAMERA_TEMPERATURE",
                    ]
                }),
            ),
            ("GetBrightnessLevel", subsystems::LED_RING) => {
                self.respond_with(conn_id, &cmd, json!({"Level": 50}));
            }
            ("GetEnableManual", subsystems::LIVE_STREAM) => {
                self.respond_with(conn_id, &cmd, json!({"EnableManual": true}));
            }
            ("GetMountConfig", subsystems::MOUNT) => self.respond_with(
                conn_id,
                &cmd,
                json!({"MaximumSpeed": 3.0, "SlewSettleTime": 1.0}),
            ),

            // System and network.
            ("GetSerialNumber", subsystems::FACTORY_CALIBRATION) => {
                self.respond_with(conn_id, &cmd, json!({"SerialNumber": "OTU140020"}));
            }
            ("HasUpdateAvailable", subsystems::SYSTEM) => {
                self.respond_with(conn_id, &cmd, json!({"Available": false, "Version": ""}));
            }
            ("GetUpdateChannel", subsystems::SYSTEM) => {
                self.respond_with(conn_id, &cmd, json!({"Channel": "Release"}));
            }
            ("SetRegulatoryDomain", subsystems::NETWORK) => {
                if let Some(code) = cmd.text("CountryCode") {
                    self.state.country_code = code.to_owned();
                }
                self.respond_ok(conn_id, &cmd);
            }
            ("HasInternetConnection", subsystems::NETWORK) => {
                self.respond_with(conn_id, &cmd, json!({"Connected": true}));
            }
            ("GetForceDirectConnect", subsystems::NETWORK) => {
                self.respond_with(conn_id, &cmd, json!({"ForceDirectConnect": false}));
            }
            ("GetDirectConnectPassword", subsystems::NETWORK) => {
                self.respond_with(conn_id, &cmd, json!({"Password": "celestron"}));
            }

            // Anything else succeeds with an empty response.
            _ => self.respond_ok(conn_id, &cmd),
        }
    }

    // -- multi-step handlers --

    fn handle_run_initialize(&mut self, conn_id: u64, cmd: &CommandRecord) {
        if let Some(latitude) = cmd.f64("Latitude") {
            self.state.latitude = latitude;
        }
        if let Some(longitude) = cmd.f64("Longitude") {
            self.state.longitude = longitude;
        }
        if let Some(time_zone) = cmd.text("TimeZone") {
            self.state.time_zone = time_zone.to_owned();
        }
        let fake = cmd.bool("FakeInitialize").unwrap_or(false);
        self.state.is_fake_initialized = fake;

        // The device acknowledges completion up front; the procedure itself
        // runs afterwards and can still fail.
        self.state.is_initializing = false;
        self.state.task_state = TaskState::Initialized;
        self.state.stage = TaskStage::Finished;
        self.state.is_ready = true;
        self.state.init_info = InitInfo {
            num_points: 2,
            position_of_focus: -1,
            num_points_remaining: 0,
            percent_complete: 100,
        };
        self.state.is_aligned = true;
        self.state.num_align_refs = self.state.num_align_refs.max(self.state.init_info.num_points);

        self.respond_ok(conn_id, cmd);
        info!(fake, "initialization started");
        self.start_initialization(fake);
    }

    fn handle_goto(&mut self, conn_id: u64, cmd: &CommandRecord) {
        if !self.state.is_aligned {
            self.respond_error(conn_id, cmd, 1, "Telescope not aligned");
            return;
        }
        self.state.set_slewing(true);
        self.state.target_ra = cmd.f64("Ra").unwrap_or(0.0);
        self.state.target_dec = cmd.f64("Dec").unwrap_or(0.0);
        info!(
            ra = self.state.target_ra,
            dec = self.state.target_dec,
            "goto started"
        );
        self.start_slew();
        self.respond_ok(conn_id, cmd);
    }

    fn handle_jog(&mut self, conn_id: u64, cmd: &CommandRecord) {
        if !self.state.is_aligned {
            self.respond_error(conn_id, cmd, 1, "Telescope not aligned");
            return;
        }
        self.state.set_slewing(true);

        let alt_rate = astro::jog_rate_arcsec(cmd.i64("AltRate").unwrap_or(0));
        let az_rate = astro::jog_rate_arcsec(cmd.i64("AzmRate").unwrap_or(0));

        let jd = astro::julian_date(self.clock.now_ms());
        let lst = astro::local_sidereal_time(jd, self.state.longitude);
        let (mut alt, mut az) = astro::equatorial_to_horizontal(
            self.state.target_ra,
            self.state.target_dec,
            self.state.latitude,
            lst,
        );
        // Jog rates apply cross-axis, matching the real mount's observed
        // behavior.
        az += (alt_rate as f64 / 3600.0).to_radians();
        alt += (az_rate as f64 / 3600.0).to_radians();
        let (ra, dec) = astro::horizontal_to_equatorial(alt, az, self.state.latitude, lst);

        self.state.target_ra = astro::normalize_ra(ra);
        self.state.target_dec = astro::clamp_dec(dec);
        debug!(
            alt_rate,
            az_rate,
            ra = self.state.target_ra,
            dec = self.state.target_dec,
            "jog retargeted"
        );
        self.start_slew();
        self.respond_ok(conn_id, cmd);
    }

    // -- response helpers --

    pub(crate) fn respond_ok(&mut self, conn_id: u64, cmd: &CommandRecord) {
        let envelope = Envelope::response(cmd, self.clock.expired_at());
        self.deliver(
            &Target::Client(conn_id),
            &serde_json::to_value(&envelope).unwrap_or_default(),
        );
    }

    pub(crate) fn respond_with(&mut self, conn_id: u64, cmd: &CommandRecord, fields: serde_json::Value) {
        let envelope = Envelope::response(cmd, self.clock.expired_at());
        self.deliver(
            &Target::Client(conn_id),
            &origin_protocol::with_fields(&envelope, fields),
        );
    }

    pub(crate) fn respond_error(&mut self, conn_id: u64, cmd: &CommandRecord, code: i64, message: &str) {
        let envelope = Envelope::error_response(cmd, code, message, self.clock.expired_at());
        self.deliver(
            &Target::Client(conn_id),
            &serde_json::to_value(&envelope).unwrap_or_default(),
        );
    }
}
