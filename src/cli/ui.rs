use kernel_dispatch::AlgorithmDescriptor;

const BANNER_WIDTH: usize = 72;
const KEY_WIDTH: usize = 18;

pub(crate) fn startup_banner(title: &str, subtitle: &str, lines: &[(&str, String)]) {
    let border = "=".repeat(BANNER_WIDTH);
    let divider = "-".repeat(BANNER_WIDTH);
    println!();
    println!("{border}");
    println!("{:^width$}", title, width = BANNER_WIDTH);
    println!("{divider}");
    println!("{:^width$}", subtitle, width = BANNER_WIDTH);
    println!("{border}");
    for (key, value) in lines {
        println!(
            "  {:<key_width$} {}",
            format!("{key}:"),
            value,
            key_width = KEY_WIDTH
        );
    }
    println!("{border}");
    println!();
}

/// Scalar descriptor fields as banner rows.
pub(crate) fn descriptor_lines(descriptor: &AlgorithmDescriptor) -> Vec<(&'static str, String)> {
    let caps = &descriptor.capabilities;
    vec![
        ("family", descriptor.family.to_string()),
        (
            "diff multipliers",
            format!(
                "{} / {} (share {})",
                descriptor.diff_multiplier1,
                descriptor.diff_multiplier2,
                descriptor.share_diff_multiplier
            ),
        ),
        (
            "intensity shift",
            format!(
                "x{} / {}",
                descriptor.xintensity_shift, descriptor.intensity_shift
            ),
        ),
        ("found idx", format!("{:#x}", descriptor.found_idx)),
        ("diff numerator", format!("{:#x}", descriptor.diff_numerator)),
        ("diff1 target", format!("{:#010x}", descriptor.diff1targ)),
        ("extra kernels", descriptor.n_extra_kernels.to_string()),
        ("rw buffer", descriptor.rw_buffer_size.to_string()),
        (
            "out-of-order",
            descriptor.queue_properties.out_of_order.to_string(),
        ),
        ("binder", format!("{:?}", caps.queue_kernel)),
        ("regenhash", format!("{:?}", caps.regenhash)),
        (
            "precalc",
            caps.precalc_hash
                .map_or_else(|| "-".to_string(), |precalc| format!("{precalc:?}")),
        ),
        ("gen hash", format!("{:?}", caps.gen_hash)),
    ]
}

pub(crate) fn info(tag: &str, message: impl AsRef<str>) {
    println!("{} {}", prefix("INFO", tag), message.as_ref());
}

pub(crate) fn success(tag: &str, message: impl AsRef<str>) {
    println!("{} {}", prefix(" OK ", tag), message.as_ref());
}

pub(crate) fn warn(tag: &str, message: impl AsRef<str>) {
    eprintln!("{} {}", prefix("WARN", tag), message.as_ref());
}

pub(crate) fn error(tag: &str, message: impl AsRef<str>) {
    eprintln!("{} {}", prefix("ERR ", tag), message.as_ref());
}

fn prefix(level: &str, tag: &str) -> String {
    format!("[{level}][{tag:<8}]")
}
