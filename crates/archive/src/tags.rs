use std::path::Path;

/// Amiga module format tags.
///
/// Amiga files carry their format either as an extension (`song.mod`) or,
/// more traditionally, as a name prefix (`mod.song`, `mdat.title`).
pub const MODULE_TAGS: &[&str] = &[
    "aam", "ahx", "aon", "bd", "bds", "bp", "bp3", "bsi", "bss", "cm", "cust", "digi", "dll", "dmu", "dw", "fc",
    "fred", "gray", "hip", "hip7", "hipc", "hvl", "instr", "jt", "mdat", "med", "mmd0", "mmd1", "mmd2", "mmd3", "mmdc",
    "mod", "okta", "rk", "sc", "sid", "smpl", "smus", "sng", "ss", "ssd", "sun", "tf", "tfmx", "ym",
];

/// Whether a file name looks like a playable module.
pub fn is_module_name(path: impl AsRef<Path>) -> bool {
    let Some(name) = path.as_ref().file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let lower = name.to_ascii_lowercase();
    let prefix = lower.split('.').next().unwrap_or_default();
    let extension = lower.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    MODULE_TAGS.contains(&prefix) || MODULE_TAGS.contains(&extension)
}

/// Tag of a TFMX-style two-part module's data half.
pub const PAIRED_DATA_TAG: &str = "mdat";
/// Tag of its sample half.
pub const PAIRED_SAMPLE_TAG: &str = "smpl";

/// For a two-part module (`mdat.x` / `smpl.x`, or `x.mdat` / `x.smpl`) the
/// name its companion sample file would have.
pub fn sample_companion_name(module: impl AsRef<Path>) -> Option<String> {
    let name = module.as_ref().file_name()?.to_str()?;
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("mdat.") {
        return Some(format!("{PAIRED_SAMPLE_TAG}{}", &name[PAIRED_DATA_TAG.len()..]));
    }
    if lower.ends_with(".mdat") {
        return Some(format!("{}{PAIRED_SAMPLE_TAG}", &name[..name.len() - PAIRED_DATA_TAG.len()]));
    }
    None
}
