//! Unit tests for item fingerprints

use xhs_crawler::fingerprint::{Fingerprint, FingerprintError, WorkItem};

#[test]
fn test_note_and_profile_urls() {
    let note = "https://www.xiaohongshu.com/explore/66a1b2c3000000000d00e4f5?xsec_token=ABC&xsec_source=pc_feed";
    assert_eq!(note.to_string().fingerprint().unwrap().as_str(), "66a1b2c3000000000d00e4f5");

    let profile = "https://www.xiaohongshu.com/user/profile/5f0e1d2c0000000001004a3b";
    assert_eq!(Fingerprint::derive(profile).unwrap().as_str(), "5f0e1d2c0000000001004a3b");
}

#[test]
fn test_fingerprint_is_stable_across_tokens() {
    let a = Fingerprint::derive("https://www.xiaohongshu.com/explore/n1?xsec_token=old").unwrap();
    let b = Fingerprint::derive("https://www.xiaohongshu.com/explore/n1?xsec_token=new").unwrap();
    let c = Fingerprint::derive("n1").unwrap();
    assert_eq!(a, b);
    assert_eq!(a, c);
}

#[test]
fn test_raw_keys_are_trimmed() {
    assert_eq!(Fingerprint::new("  key \n").unwrap().as_str(), "key");
    assert_eq!(Fingerprint::new("key").unwrap().into_inner(), "key");
}

#[test]
fn test_invalid_inputs() {
    assert_eq!(Fingerprint::new(""), Err(FingerprintError::Empty));
    assert!(matches!(
        Fingerprint::from_url("not a url"),
        Err(FingerprintError::InvalidUrl(_))
    ));
    assert!(matches!(
        Fingerprint::derive("https://"),
        Err(FingerprintError::InvalidUrl(_))
    ));
}

#[test]
fn test_fingerprint_work_item_is_identity() {
    let fp = Fingerprint::new("https://not-parsed").unwrap();
    assert_eq!(fp.fingerprint().unwrap(), fp);
}
