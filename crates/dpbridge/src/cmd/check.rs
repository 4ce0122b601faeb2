use dpbridge_mapping::{DeviceProfile, ProfileRegistry, RegistryConfig};
use serde::Serialize;

use crate::cmd::CheckArgs;
use crate::exit::{mapping_error, CliResult, SUCCESS};
use crate::output::{self, OutputFormat};

#[derive(Debug, Serialize)]
struct ProfileSummary {
    device: String,
    datapoints: usize,
    settings: usize,
    battery_percentage_dp: Option<u8>,
    battery_state_dp: Option<u8>,
    battery_voltage_dp: Option<u8>,
}

#[derive(Debug, Serialize)]
struct CheckOutput {
    dir: String,
    strict: bool,
    profiles: Vec<ProfileSummary>,
}

pub fn run(args: CheckArgs, format: OutputFormat) -> CliResult<i32> {
    let config = RegistryConfig {
        strict_mode: args.strict,
        ..RegistryConfig::default()
    };
    let registry = ProfileRegistry::from_directory_with_config(&args.dir, config)
        .map_err(|err| mapping_error(&format!("check {}", args.dir.display()), err))?;

    let profiles = registry
        .devices()
        .into_iter()
        .filter_map(|device| registry.get(device))
        .map(summarize)
        .collect();
    let out = CheckOutput {
        dir: args.dir.display().to_string(),
        strict: args.strict,
        profiles,
    };
    print_check(&out, format);
    Ok(SUCCESS)
}

fn summarize(profile: &DeviceProfile) -> ProfileSummary {
    let settings = profile
        .datapoints
        .iter()
        .filter(|mapping| mapping.attribute.is_none())
        .count();
    ProfileSummary {
        device: profile.device.clone(),
        datapoints: profile.datapoints.len(),
        settings,
        battery_percentage_dp: profile.battery.percentage_dp,
        battery_state_dp: profile.battery.state_dp,
        battery_voltage_dp: profile.battery.voltage_dp,
    }
}

fn dp_text(dp: Option<u8>) -> String {
    dp.map_or_else(|| "-".to_string(), |dp| dp.to_string())
}

fn print_check(out: &CheckOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => output::print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => {
            let mut table = output::table(vec![
                "DEVICE",
                "DATAPOINTS",
                "SETTINGS",
                "BATTERY %",
                "BATTERY STATE",
                "BATTERY V",
            ]);
            for profile in &out.profiles {
                table.add_row(vec![
                    profile.device.clone(),
                    profile.datapoints.to_string(),
                    profile.settings.to_string(),
                    dp_text(profile.battery_percentage_dp),
                    dp_text(profile.battery_state_dp),
                    dp_text(profile.battery_voltage_dp),
                ]);
            }
            println!("{table}");
            println!("{} profile(s) valid in {}", out.profiles.len(), out.dir);
        }
        OutputFormat::Raw => {
            for profile in &out.profiles {
                println!("{}", profile.device);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use dpbridge_mapping::{DpMapping, Transform};

    use super::*;

    #[test]
    fn summary_counts_settings_and_battery() {
        let profile = DeviceProfile::new("acme:trv01")
            .with_mapping(DpMapping::new(2, "target_temperature", Transform::scale(10.0)))
            .with_mapping(DpMapping::setting(107));
        let summary = summarize(&profile);
        assert_eq!(summary.datapoints, 2);
        assert_eq!(summary.settings, 1);
        assert_eq!(summary.battery_percentage_dp, Some(15));
        assert_eq!(summary.battery_state_dp, Some(14));
        assert_eq!(summary.battery_voltage_dp, None);
    }
}
