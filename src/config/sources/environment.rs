//! Environment overrides: `PULSE_<KEY>`, nested keys joined with `__`
//! (e.g. `PULSE_STORAGE__PATH`, `PULSE_LOGGING__LEVEL`).

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::Environment;

pub const ENV_PREFIX: &str = "PULSE";

pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    )
}
