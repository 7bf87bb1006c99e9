use super::*;

#[test]
fn test_external_ip_mapper_none_with_empty_list() -> Result<()> {
    assert!(ExternalIpMapper::new(CandidateType::Unspecified, &[])?.is_none());

    Ok(())
}

#[test]
fn test_external_ip_mapper_unsupported_candidate_type() {
    let ips = vec!["1.2.3.4".to_owned()];

    assert!(ExternalIpMapper::new(CandidateType::PeerReflexive, &ips).is_err());
    assert!(ExternalIpMapper::new(CandidateType::Relay, &ips).is_err());
}

#[test]
fn test_external_ip_mapper_sole_ip() -> Result<()> {
    let ips = vec!["1.2.3.4".to_owned()];

    let m = ExternalIpMapper::new(CandidateType::Unspecified, &ips)?.unwrap();
    assert_eq!(m.candidate_type, CandidateType::Host);

    let ext_ip = m.find_external_ip("10.0.0.1")?;
    assert_eq!(ext_ip.to_string(), "1.2.3.4");

    let ext_ip = m.find_external_ip("10.0.0.2")?;
    assert_eq!(ext_ip.to_string(), "1.2.3.4");

    // No IPv6 mapping was configured.
    assert!(m.find_external_ip("fe80::1").is_err());

    Ok(())
}

#[test]
fn test_external_ip_mapper_explicit_mapping() -> Result<()> {
    let ips = vec![
        "1.2.3.4/10.0.0.1".to_owned(),
        "1.2.3.5/10.0.0.2".to_owned(),
    ];

    let m = ExternalIpMapper::new(CandidateType::ServerReflexive, &ips)?.unwrap();
    assert_eq!(m.candidate_type, CandidateType::ServerReflexive);

    assert_eq!(m.find_external_ip("10.0.0.1")?.to_string(), "1.2.3.4");
    assert_eq!(m.find_external_ip("10.0.0.2")?.to_string(), "1.2.3.5");
    assert!(m.find_external_ip("10.0.0.3").is_err());

    Ok(())
}

#[test]
fn test_external_ip_mapper_invalid_mappings() {
    // Sole IP twice for the same family.
    let ips = vec!["1.2.3.4".to_owned(), "1.2.3.5".to_owned()];
    assert!(ExternalIpMapper::new(CandidateType::Unspecified, &ips).is_err());

    // Sole IP mixed with an explicit pair.
    let ips = vec!["1.2.3.4".to_owned(), "1.2.3.5/10.0.0.1".to_owned()];
    assert!(ExternalIpMapper::new(CandidateType::Unspecified, &ips).is_err());

    // Duplicate local IP.
    let ips = vec![
        "1.2.3.4/10.0.0.1".to_owned(),
        "1.2.3.5/10.0.0.1".to_owned(),
    ];
    assert!(ExternalIpMapper::new(CandidateType::Unspecified, &ips).is_err());

    // Family mismatch inside a pair.
    let ips = vec!["1.2.3.4/fe80::1".to_owned()];
    assert!(ExternalIpMapper::new(CandidateType::Unspecified, &ips).is_err());

    // Not an IP at all.
    let ips = vec!["bad.ip.address".to_owned()];
    assert!(ExternalIpMapper::new(CandidateType::Unspecified, &ips).is_err());
}
