//! The telescope state store.
//!
//! One process-wide record of every observable field the protocol reports,
//! plus the bookkeeping that drives the simulation (sequence counter, image
//! cycle, tracking base coordinates, activity flags).  Mutated only by the
//! core event loop; initial values mirror a freshly powered-on device.

use rand::Rng;

use crate::astro::{clamp_dec, normalize_ra};

pub const VERSION_NUMBER: &str = "1.1.4248";
pub const VERSION_STRING: &str = "1.1.4248\n (C++ = 09-04-2024 18:19, Java = 09-04-2024 18:19)";

/// Approximate sidereal tracking rate in radians per second.
const SIDEREAL_RATE: f64 = 0.000_011_6;
/// Slow orientation drift while tracking, radians per second.
const ORIENTATION_DRIFT: f64 = 0.000_01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryLevel {
    High,
    Med,
    Low,
}

impl BatteryLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            BatteryLevel::High => "HIGH",
            BatteryLevel::Med => "MED",
            BatteryLevel::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Live,
    HipsImage,
    Stacked,
}

impl ImageType {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageType::Live => "LIVE",
            ImageType::HipsImage => "HIPS_IMAGE",
            ImageType::Stacked => "STACKED",
        }
    }
}

/// Task controller state.  `Initialized` is reported by real firmware the
/// moment `RunInitialize` is accepted, before the procedure actually runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Initializing,
    Initialized,
    Imaging,
    Slewing,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Idle => "IDLE",
            TaskState::Initializing => "INITIALIZING",
            TaskState::Initialized => "INITIALIZED",
            TaskState::Imaging => "IMAGING",
            TaskState::Slewing => "SLEWING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStage {
    InProgress,
    Complete,
    Stopped,
    Finished,
}

impl TaskStage {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStage::InProgress => "IN_PROGRESS",
            TaskStage::Complete => "COMPLETE",
            TaskStage::Stopped => "STOPPED",
            TaskStage::Finished => "FINISHED",
        }
    }
}

/// Progress of a running initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitInfo {
    pub num_points: i64,
    pub position_of_focus: i64,
    pub num_points_remaining: i64,
    pub percent_complete: i64,
}

impl Default for InitInfo {
    fn default() -> Self {
        InitInfo {
            num_points: 0,
            position_of_focus: -1,
            num_points_remaining: 2,
            percent_complete: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelescopeState {
    // Mount
    pub battery_level: BatteryLevel,
    pub battery_voltage: f64,
    pub charger_status: String,
    pub time_zone: String,
    /// Observer latitude, radians.
    pub latitude: f64,
    /// Observer longitude, radians.
    pub longitude: f64,
    pub is_aligned: bool,
    pub is_goto_over: bool,
    pub is_tracking: bool,
    pub is_slewing: bool,
    pub num_align_refs: i64,
    pub enc0: f64,
    pub enc1: f64,
    pub ra: f64,
    pub dec: f64,
    pub target_ra: f64,
    pub target_dec: f64,

    // Camera
    pub binning: i64,
    pub bit_depth: i64,
    pub color_r_balance: f64,
    pub color_g_balance: f64,
    pub color_b_balance: f64,
    pub exposure: f64,
    pub iso: i64,
    pub offset: i64,

    // Focuser
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

    // Environment
    pub ambient_temperature: f64,
    pub camera_temperature: f64,
    pub cpu_fan_on: bool,
    pub cpu_temperature: f64,
    pub dew_point: f64,
    pub front_cell_temperature: f64,
    pub humidity: f64,
    pub ota_fan_on: bool,
    pub recalibrating: bool,

    // Image
    pub file_location: String,
    pub image_type: ImageType,
    pub orientation: f64,
    pub fov_x: f64,
    pub fov_y: f64,

    // Disk
    pub capacity: i64,
    pub free_bytes: i64,
    pub disk_level: String,

    // Dew heater
    pub aggression: i64,
    pub heater_level: f64,
    pub manual_power_level: f64,
    pub heater_mode: String,

    // Orientation sensor
    pub altitude: i64,

    // Task controller
    pub is_ready: bool,
    pub stage: TaskStage,
    pub task_state: TaskState,
    pub init_info: InitInfo,
    pub is_fake_initialized: bool,
    pub is_initializing: bool,

    // Factory calibration
    pub is_factory_calibrated: bool,
    pub num_times_collimated: i64,
    pub num_times_hot_spot_centered: i64,
    pub completed_phases: Vec<String>,
    pub current_phase: String,

    // Network
    pub country_code: String,

    // Imaging
    pub is_imaging: bool,
    pub imaging_time_left: i64,

    // Image server
    pub astrophotography_dirs: Vec<String>,

    // Simulation bookkeeping
    current_sequence_id: i64,
    image_counter: i64,
    pub base_ra: f64,
    pub base_dec: f64,
    base_orientation: f64,
    tracking_epoch_ms: i64,
    disk_update_count: u64,
}

impl TelescopeState {
    pub fn new(now_ms: i64) -> Self {
        TelescopeState {
            battery_level: BatteryLevel::High,
            battery_voltage: 10.38,
            charger_status: "CHARGING".to_owned(),
            time_zone: "Europe/London".to_owned(),
            latitude: 0.5907141501744784,
            longitude: -2.065392832281757,
            is_aligned: false,
            is_goto_over: true,
            is_tracking: false,
            is_slewing: false,
            num_align_refs: 0,
            enc0: 0.0,
            enc1: 0.0,
            ra: 3.83883,
            dec: 0.973655,
            target_ra: 0.0,
            target_dec: 0.0,

            binning: 1,
            bit_depth: 24,
            color_r_balance: 78.0,
            color_g_balance: 58.0,
            color_b_balance: 120.0,
            exposure: 0.03,
            iso: 100,
            offset: 0,

            backlash: 255,
            calibration_lower_limit: 1975,
            calibration_upper_limit: 37527,
            is_calibration_complete: true,
            is_move_to_over: true,
            need_auto_focus: false,
            percentage_calibration_complete: 100,
            position: 18386,
            requires_calibration: false,
            velocity: 0.0,

            ambient_temperature: 15.988,
            camera_temperature: 24.3,
            cpu_fan_on: true,
            cpu_temperature: 42.842,
            dew_point: 8.108,
            front_cell_temperature: 11.35,
            humidity: 67.0,
            ota_fan_on: true,
            recalibrating: false,

            file_location: "Images/Temp/0.jpg".to_owned(),
            image_type: ImageType::Live,
            orientation: 0.003215,
            fov_x: 0.021893731343283578,
            fov_y: 0.014672238805970147,

            capacity: 58_281_033_728,
            free_bytes: 52_024_094_720,
            disk_level: "OK".to_owned(),

            aggression: 5,
            heater_level: 0.0,
            manual_power_level: 0.0,
            heater_mode: "Auto".to_owned(),

            altitude: 59,

            is_ready: false,
            stage: TaskStage::InProgress,
            task_state: TaskState::Idle,
            init_info: InitInfo::default(),
            is_fake_initialized: false,
            is_initializing: false,

            is_factory_calibrated: true,
            num_times_collimated: 2,
            num_times_hot_spot_centered: 2,
            completed_phases: [
                "UPDATE",
                "HARDWARE_CALIBRATION",
                "DARK_GENERATION",
                "FLAT_GENERATION",
                "FA_TEST",
                "BATTERY",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),
            current_phase: "IDLE".to_owned(),

            country_code: "GB".to_owned(),

            is_imaging: false,
            imaging_time_left: 0,

            astrophotography_dirs: [
                "(4)_Vesta_05-05-25_22_30_25",
                "Bode's_Nebulae_05-05-25_22_00_53",
                "Messier_3_05-05-25_21_51_52",
                "Messier_101_05-03-25_22_33_50",
                "Whirlpool_Galaxy_05-03-25_21_58_46",
                "Jupiter_05-03-25_21_55_57",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),

            current_sequence_id: 16816,
            image_counter: 0,
            base_ra: 3.83883,
            base_dec: 0.973655,
            base_orientation: 0.003215,
            tracking_epoch_ms: now_ms,
            disk_update_count: 0,
        }
    }

    /// Next notification sequence id; strictly increasing for the process
    /// lifetime.
    pub fn next_sequence_id(&mut self) -> i64 {
        self.current_sequence_id += 1;
        self.current_sequence_id
    }

    pub fn last_sequence_id(&self) -> i64 {
        self.current_sequence_id
    }

    /// Flip the slew flags as a pair: `isGotoOver` is always `!isSlewing`.
    pub fn set_slewing(&mut self, slewing: bool) {
        self.is_slewing = slewing;
        self.is_goto_over = !slewing;
    }

    /// Re-base the tracking simulation at the current position.
    pub fn sync_tracking(&mut self, now_ms: i64) {
        self.base_ra = self.ra;
        self.base_dec = self.dec;
        self.base_orientation = self.orientation;
        self.tracking_epoch_ms = now_ms;
    }

    /// Advance RA by the sidereal rate since the last re-base, jitter Dec a
    /// little and drift the orientation.  Called before each mount emission.
    pub fn advance_celestial(&mut self, now_ms: i64, rng: &mut impl Rng) {
        let elapsed = (now_ms - self.tracking_epoch_ms) as f64 / 1000.0;
        let jitter = f64::from(rng.gen_range(0..20) - 10) * 0.000_000_1;
        self.ra = normalize_ra(self.base_ra + elapsed * SIDEREAL_RATE);
        self.dec = clamp_dec(self.base_dec + jitter);
        self.orientation = self.base_orientation + elapsed * ORIENTATION_DRIFT;
    }

    /// Small bounded jitter on the thermal sensors, plus the altitude flip
    /// between 59 and 60.  Called before environment and orientation
    /// emissions.
    pub fn advance_environment(&mut self, rng: &mut impl Rng) {
        self.ambient_temperature += f64::from(rng.gen_range(0..10) - 5) / 1000.0;
        self.cpu_temperature += f64::from(rng.gen_range(0..20) - 10) / 1000.0;
        self.dew_point += f64::from(rng.gen_range(0..6) - 3) / 1000.0;

        self.ambient_temperature = self.ambient_temperature.clamp(15.0, 17.0);
        self.cpu_temperature = self.cpu_temperature.clamp(42.0, 45.0);

        self.altitude = 59 + rng.gen_range(0..2);
    }

    /// Slow disk decay: about 1 MB disappears every 100th update, with a
    /// reset once free space dips under half the capacity.
    pub fn update_disk_space(&mut self, rng: &mut impl Rng) {
        self.disk_update_count += 1;
        if self.disk_update_count % 100 == 0 {
            self.free_bytes -= i64::from(rng.gen_range(0..1_000_000));
            if self.free_bytes < self.capacity / 2 {
                self.free_bytes = self.capacity - 10_000_000;
            }
        }
        self.free_bytes = self.free_bytes.clamp(0, self.capacity);
    }

    /// Cycle the live preview filename through `Images/Temp/0..9.jpg`.
    pub fn next_image_file(&mut self) -> String {
        self.image_counter = (self.image_counter + 1) % 10;
        format!("Images/Temp/{}.jpg", self.image_counter)
    }
}
