use serde::{Deserialize, Serialize};

/// A module in the built-in catalog of playable examples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub id: String,
    pub name: String,
    /// Replayer format, for display only.
    pub format: String,
    pub duration: String,
    #[serde(flatten)]
    pub source: ExampleSource,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Where an example is downloaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExampleSource {
    /// Two-part module (TFMX) whose halves live at separate URLs.
    Pair { mdat_url: String, smpl_url: String },
    Single { url: String },
}

fn single(id: &str, name: &str, format: &str, duration: &str, url: &str, kind: &str) -> Example {
    Example {
        id: id.to_string(),
        name: name.to_string(),
        format: format.to_string(),
        duration: duration.to_string(),
        source: ExampleSource::Single { url: url.to_string() },
        kind: kind.to_string(),
    }
}

/// The catalog shipped by default.
pub fn default_examples() -> Vec<Example> {
    vec![
        single(
            "captain-space-debris",
            "Captain - Space Debris",
            "Protracker",
            "5:06",
            "https://modland.com/pub/modules/Protracker/Captain/space%20debris.mod",
            "mod",
        ),
        single(
            "lizardking-doskpop",
            "Lizardking - Doskpop",
            "Protracker",
            "2:26",
            "https://modland.com/pub/modules/Protracker/Lizardking/l.k%27s%20doskpop.mod",
            "mod",
        ),
        single(
            "pink-stormlord",
            "Pink - Stormlord",
            "AHX",
            "8:31 (12KB!)",
            "https://modland.com/pub/modules/AHX/Pink/stormlord.ahx",
            "ahx",
        ),
        Example {
            id: "huelsbeck-turrican2".to_string(),
            name: "Chris Huelsbeck - Turrican 2".to_string(),
            format: "TFMX".to_string(),
            duration: "12 min (Level 0 Intro)".to_string(),
            source: ExampleSource::Pair {
                mdat_url: "https://modland.com/pub/modules/TFMX/Chris%20Huelsbeck/mdat.turrican%202%20level%200-intro"
                    .to_string(),
                smpl_url: "https://modland.com/pub/modules/TFMX/Chris%20Huelsbeck/smpl.turrican%202%20level%200-intro"
                    .to_string(),
            },
            kind: "tfmx".to_string(),
        },
        single(
            "moby-late-nite",
            "Moby - Late Nite",
            "Oktalyzer",
            "6:27",
            "https://modland.com/pub/modules/Oktalyzer/Moby/late%20nite.okta",
            "okta",
        ),
        single(
            "romeo-knight-beat",
            "Romeo Knight - Beat to the Pulp",
            "SidMon 1",
            "2:41",
            "https://modland.com/pub/modules/SidMon%201/Romeo%20Knight/beat%20to%20the%20pulp.sid",
            "sid",
        ),
        single(
            "wings-of-death-levels",
            "Jochen Hippel - Wings of Death",
            "Hippel-COSO",
            "23 min (Levels 1-7)",
            "https://zakalwe.fi/uade/amiga-music/customs/WingsOfDeath-Levels1-7/cust.WingsOfDeath-Levels1-7",
            "cust",
        ),
        single(
            "led-storm",
            "Tim Follin - LED Storm",
            "Hippel-COSO (LHA)",
            "38 min (7 tracks)",
            "http://files.exotica.org.uk/?file=exotica%2Fmedia%2Faudio%2FUnExoticA%2FGame%2FFollin_Tim%2FL_E_D_Storm.lha",
            "lha",
        ),
        single(
            "hoffman-way-too-rude",
            "Hoffman - Way Too Rude",
            "Protracker",
            "4:17",
            "https://api.modarchive.org/downloads.php?moduleid=188875#way_too_rude.mod",
            "mod",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let examples = default_examples();
        let json = serde_json::to_value(&examples).unwrap();
        assert_eq!(json[0]["url"], "https://modland.com/pub/modules/Protracker/Captain/space%20debris.mod");
        assert_eq!(json[0]["type"], "mod");
        let tfmx = &json[3];
        assert!(tfmx.get("url").is_none());
        assert!(tfmx["mdat_url"].as_str().unwrap().contains("mdat.turrican"));
        assert!(tfmx["smpl_url"].as_str().unwrap().contains("smpl.turrican"));
    }

    #[test]
    fn test_round_trip_keeps_source_kind() {
        let json = serde_json::to_string(&default_examples()).unwrap();
        let back: Vec<Example> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, default_examples());
    }
}
