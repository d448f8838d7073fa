//! Common test utilities for integration tests

use std::fs;
use std::io::Write;
use std::path::Path;

/// Helper function to create a test XML file, creating parent directories
#[allow(dead_code)]
pub fn create_test_xml_file(path: &Path, content: &str) {
    let parent = path.parent().unwrap();
    fs::create_dir_all(parent).unwrap();
    fs::File::create(path)
        .unwrap()
        .write_all(content.as_bytes())
        .unwrap();
}

/// Names of the regular files directly inside `dir`, sorted
#[allow(dead_code)]
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().unwrap().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Two record tags with differing attribute sets
#[allow(dead_code)]
pub const SAMPLE_HEALTH_XML: &str = r#"<HealthData><Record type="A" value="1"/><Record type="B"/><Workout dur="5"/></HealthData>"#;

/// A realistic slice of an Apple Health export
#[allow(dead_code)]
pub const SAMPLE_EXPORT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE HealthData [
<!ELEMENT HealthData (ExportDate,Me,(Record|Workout)*)>
]>
<HealthData locale="en_US">
 <ExportDate value="2024-03-01 10:00:00 +0100"/>
 <Me HKCharacteristicTypeIdentifierDateOfBirth="1990-01-01" HKCharacteristicTypeIdentifierBiologicalSex="HKBiologicalSexFemale"/>
 <Record type="HKQuantityTypeIdentifierStepCount" sourceName="Phone" unit="count" startDate="2024-02-29 08:00:00 +0100" value="412"/>
 <Record type="HKQuantityTypeIdentifierHeartRate" sourceName="Watch" unit="count/min" startDate="2024-02-29 08:01:00 +0100" value="72">
  <MetadataEntry key="HKMetadataKeyHeartRateMotionContext" value="0"/>
 </Record>
 <Record type="HKQuantityTypeIdentifierStepCount" sourceName="Phone &amp; Watch" unit="count" startDate="2024-02-29 09:00:00 +0100" value="88"/>
 <Workout workoutActivityType="HKWorkoutActivityTypeRunning" duration="31.5" durationUnit="min"/>
</HealthData>
"#;

/// Truncated document
#[allow(dead_code)]
pub const MALFORMED_XML: &str = r#"<HealthData><Record type="A" value="1"/><Record type="B""#;

#[allow(dead_code)]
pub const EMPTY_ROOT_XML: &str = "<HealthData/>";
