/// A canonical tag on the new site and every legacy label that migrates onto it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagRule {
    pub key: &'static str,
    pub display_name: &'static str,
    pub legacy_labels: &'static [&'static str],
}

impl TagRule {
    fn matches(&self, legacy_label: &str) -> bool {
        self.legacy_labels.contains(&legacy_label)
    }
}

// Labels may appear under more than one rule ("LKFT" is both a kernel and a testing topic)
pub const TAG_RULES: &[TagRule] = &[
    TagRule {
        key: "android",
        display_name: "Android",
        legacy_labels: &["Android", "AOSP"],
    },
    TagRule {
        key: "arm",
        display_name: "Arm",
        legacy_labels: &["Arm", "ARM", "AArch64", "SystemReady"],
    },
    TagRule {
        key: "ai-ml",
        display_name: "AI & ML",
        legacy_labels: &["Artificial Intelligence", "Machine Learning"],
    },
    TagRule {
        key: "automotive",
        display_name: "Automotive",
        legacy_labels: &["Automotive", "Software defined Vehicle"],
    },
    TagRule {
        key: "ci",
        display_name: "CI",
        legacy_labels: &["CI"],
    },
    TagRule {
        key: "datacenter",
        display_name: "Datacenter",
        legacy_labels: &["Datacenter", "Big Data", "Server"],
    },
    TagRule {
        key: "hpc",
        display_name: "HPC",
        legacy_labels: &["Supercomputing", "HPC", "LINARO FORGE", "Linaro Forge"],
    },
    TagRule {
        key: "iot-embedded",
        display_name: "IOT & Embedded",
        legacy_labels: &["IoT", "Raspberry Pi", "OpenEmbedded", "RockPi4B", "Embedded"],
    },
    TagRule {
        key: "linaro-connect",
        display_name: "Linaro Connect",
        legacy_labels: &["Linaro Connect"],
    },
    TagRule {
        key: "linux-kernel",
        display_name: "Linux Kernel",
        legacy_labels: &["Linux Kernel", "Kernel Development", "Kernel Release", "LKFT"],
    },
    TagRule {
        key: "open-source",
        display_name: "Open Source",
        legacy_labels: &[
            "Open Source",
            "Debian",
            "GNU",
            "LLVM",
            "MCUboot",
            "OP-TEE",
            "Rust",
        ],
    },
    TagRule {
        key: "security",
        display_name: "Security",
        legacy_labels: &["Security", "Encryption"],
    },
    TagRule {
        key: "toolchain",
        display_name: "Toolchain",
        legacy_labels: &["Toolchain", "LAVA"],
    },
    TagRule {
        key: "virtualization",
        display_name: "Virtualization",
        legacy_labels: &["Virtualization"],
    },
    TagRule {
        key: "windows-on-arm",
        display_name: "Windows on Arm",
        legacy_labels: &["Windows On Arm"],
    },
    TagRule {
        key: "testing",
        display_name: "Testing",
        legacy_labels: &["Testing", "LKFT"],
    },
    TagRule {
        key: "debugging",
        display_name: "Debugging",
        legacy_labels: &["Debugging"],
    },
    TagRule {
        key: "u-boot",
        display_name: "U-Boot",
        legacy_labels: &["U-boot", "U-Boot"],
    },
    TagRule {
        key: "qemu",
        display_name: "QEMU",
        legacy_labels: &["QEMU"],
    },
];

/// remap_tag returns the key of every canonical tag the legacy label migrates onto, in table order
pub fn remap_tag(legacy_label: &str) -> Vec<&'static str> {
    TAG_RULES
        .iter()
        .filter(|rule| rule.matches(legacy_label))
        .map(|rule| rule.key)
        .collect()
}

/// remap_tag_list migrates a document's whole tag list
///
/// Keys are deduplicated keeping the first-seen order. Labels without a rule are dropped, the
/// canonical set is deliberately much smaller than the legacy one.
pub fn remap_tag_list<'a, I>(legacy_labels: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut keys: Vec<String> = Vec::new();
    for key in legacy_labels.into_iter().flat_map(remap_tag) {
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn label_can_map_to_several_tags() {
        assert_eq!(remap_tag("LKFT"), vec!["linux-kernel", "testing"]);
        assert_eq!(remap_tag("AArch64"), vec!["arm"]);
        assert!(remap_tag("arm").is_empty());
    }

    #[test]
    fn list_is_flattened_deduplicated_and_filtered() {
        assert_eq!(
            remap_tag_list(["LKFT", "Testing", "Unknown"]),
            vec!["linux-kernel", "testing"]
        );
        assert_eq!(
            remap_tag_list(["Arm", "LKFT", "ARM"]),
            vec!["arm", "linux-kernel", "testing"]
        );
        assert!(remap_tag_list(Vec::<&str>::new()).is_empty());
    }

    #[test]
    fn keys_are_unique() {
        let keys: HashSet<_> = TAG_RULES.iter().map(|rule| rule.key).collect();
        assert_eq!(keys.len(), TAG_RULES.len());
    }
}
