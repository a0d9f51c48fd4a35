//! Bevy application setup

use bevy::asset::AssetMetaCheck;
use bevy::prelude::*;
use bevy::window::ExitCondition;
use bevy::winit::{UpdateMode, WinitSettings};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::fetch::FetchPlugin;
use crate::instance::InstancePlugin;
use crate::model::ModelPlugin;

/// Upper bound on the wait between frames while nothing is animating.
/// Page-side signals (rescans, resizes, finished downloads) are picked up
/// on the next wake.
const IDLE_WAKE: Duration = Duration::from_millis(250);

/// Ambient light shared by every viewer
const AMBIENT_BRIGHTNESS: f32 = 400.0;

/// Set by the page resize listener
#[derive(Resource, Clone, Default)]
pub struct ResizeSignal(pub Arc<AtomicBool>);

/// Run the Bevy application
pub fn run() {
    let resize = ResizeSignal::default();
    crate::dom::watch_resize(resize.0.clone());

    App::new()
        // Reactive rendering, animating viewers request redraws themselves
        .insert_resource(WinitSettings {
            focused_mode: UpdateMode::reactive_low_power(IDLE_WAKE),
            unfocused_mode: UpdateMode::reactive_low_power(IDLE_WAKE),
        })
        .insert_resource(AmbientLight {
            color: Color::WHITE,
            brightness: AMBIENT_BRIGHTNESS,
            ..default()
        })
        .insert_resource(resize)
        .add_plugins(DefaultPlugins
            .set(WindowPlugin {
                // Every block gets its own window, bound to a canvas on the page
                primary_window: None,
                exit_condition: ExitCondition::DontExit,
                close_when_requested: false,
                ..default()
            })
            .set(AssetPlugin {
                file_path: "".to_string(),
                // Don't look for .meta files - server doesn't have them
                meta_check: AssetMetaCheck::Never,
                ..default()
            })
        )
        .add_plugins(FetchPlugin)
        .add_plugins(InstancePlugin)
        .add_plugins(ModelPlugin)
        .run();
}
