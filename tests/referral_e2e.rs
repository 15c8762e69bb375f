mod common;

use anyhow::Result;
use common::{free_port, people_directory, person, BASE};
use ldapflow::entry::Entry;
use ldapflow::server::{referral_entry, InMemoryDirectory, InMemoryDirectoryServer, RunningServer};
use ldapflow::{ConnectionOptions, LdapConnection, LdapError, ResultCode, SearchRequest, SearchScope};

fn options(sync: bool, follow: bool) -> ConnectionOptions {
    ConnectionOptions {
        use_synchronous_mode: sync,
        follow_referrals: follow,
        response_timeout_ms: 5_000,
        ..ConnectionOptions::default()
    }
}

fn start(directory: InMemoryDirectory) -> Result<RunningServer> {
    InMemoryDirectoryServer::new(directory).start("127.0.0.1:0")
}

/// ds2: owns `ou=remote` with two people.
fn remote_server() -> Result<RunningServer> {
    let mut directory = InMemoryDirectory::new([BASE]);
    directory.add(Entry::new(BASE).with_attribute("objectClass", ["domain"]))?;
    directory.add(Entry::new(format!("ou=remote,{BASE}")).with_attribute("objectClass", ["organizationalUnit"]))?;
    directory.add(person("r1", "remote"))?;
    directory.add(person("r2", "remote"))?;
    start(directory)
}

/// ds1: one person locally, `ou=remote` delegated to `target`.
fn origin_server(target: &str) -> Result<RunningServer> {
    let mut directory = people_directory(1)?;
    directory.add(referral_entry(&format!("ou=remote,{BASE}"), [target.to_string()]))?;
    start(directory)
}

fn everything() -> SearchRequest {
    SearchRequest::new(BASE, SearchScope::Subtree, ldapflow::Filter::present("objectClass"))
}

#[test]
fn continuation_reference_is_followed_in_both_modes() -> Result<()> {
    let ds2 = remote_server()?;
    let ds1 = origin_server(&ds2.url(&format!("ou=remote,{BASE}")))?;
    for sync in [true, false] {
        let conn = LdapConnection::connect("127.0.0.1", ds1.port(), options(sync, true))?;
        let result = conn.search(&everything())?;
        assert_eq!(result.entry_count(), 6, "sync={sync}");
        assert_eq!(result.reference_count(), 0);
        assert!(result.search_entry(&format!("uid=r2,ou=remote,{BASE}")).is_some());
        assert!(result.search_entry(&format!("uid=user0,ou=people,{BASE}")).is_some());
    }
    Ok(())
}

#[test]
fn reference_is_returned_when_not_following() -> Result<()> {
    let ds2 = remote_server()?;
    let url = ds2.url(&format!("ou=remote,{BASE}"));
    let ds1 = origin_server(&url)?;
    let conn = LdapConnection::connect("127.0.0.1", ds1.port(), options(false, false))?;
    let result = conn.search(&everything())?;
    assert_eq!(result.entry_count(), 3);
    assert_eq!(result.reference_count(), 1);
    assert_eq!(result.search_references().unwrap()[0].urls, vec![url]);

    // A per-request override wins over the connection default
    let mut request = everything();
    request.set_follow_referrals(Some(true));
    let followed = conn.search(&request)?;
    assert_eq!(followed.entry_count(), 6);
    Ok(())
}

#[test]
fn referral_result_is_replaced_by_the_remote_outcome() -> Result<()> {
    let ds2 = remote_server()?;
    let url = ds2.url(&format!("ou=remote,{BASE}"));
    let ds1 = origin_server(&url)?;
    let request = SearchRequest::new(format!("ou=remote,{BASE}"), SearchScope::Subtree, ldapflow::Filter::present("uid"));

    let conn = LdapConnection::connect("127.0.0.1", ds1.port(), options(true, true))?;
    let result = conn.search(&request)?;
    assert_eq!(result.entry_count(), 2);
    assert_eq!(result.result_code(), ResultCode::SUCCESS);

    let plain = LdapConnection::connect("127.0.0.1", ds1.port(), options(true, false))?;
    match plain.search(&request) {
        Err(LdapError::ReferralUnresolvable(referral)) => {
            assert_eq!(referral.referral_urls(), [url]);
            assert_eq!(referral.matched_dn(), Some(format!("ou=remote,{BASE}").as_str()));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    Ok(())
}

/// Six servers, each delegating `ou=chain` to the next; the last one holds it.
fn chain() -> Result<Vec<RunningServer>> {
    let mut servers: Vec<RunningServer> = Vec::new();
    let mut last = InMemoryDirectory::new([BASE]);
    last.add(Entry::new(format!("ou=chain,{BASE}")).with_attribute("objectClass", ["organizationalUnit"]))?;
    servers.push(start(last)?);
    for _ in 0..5 {
        let next = servers.last().map(|s| s.url(&format!("ou=chain,{BASE}"))).unwrap();
        let mut directory = InMemoryDirectory::new([BASE]);
        directory.add(referral_entry(&format!("ou=chain,{BASE}"), [next]))?;
        servers.push(start(directory)?);
    }
    servers.reverse();
    Ok(servers)
}

#[test]
fn referral_chain_stops_at_the_hop_limit() -> Result<()> {
    let servers = chain()?;
    let request = SearchRequest::new(format!("ou=chain,{BASE}"), SearchScope::Base, ldapflow::Filter::present("objectClass"));
    for sync in [true, false] {
        let conn = LdapConnection::connect("127.0.0.1", servers[0].port(), options(sync, true))?;
        let err = conn.search(&request).unwrap_err();
        assert!(matches!(err, LdapError::ReferralLimitExceeded(_)), "{err}");
        assert_eq!(err.result_code(), ResultCode::REFERRAL_LIMIT_EXCEEDED);

        let mut roomy = options(sync, true);
        roomy.referral_hop_limit = 10;
        let conn = LdapConnection::connect("127.0.0.1", servers[0].port(), roomy)?;
        let result = conn.search(&request)?;
        assert_eq!(result.entry_count(), 1);
    }
    Ok(())
}

#[test]
fn unreachable_reference_downgrades_the_final_code() -> Result<()> {
    let dead = format!("ldap://127.0.0.1:{}/ou=remote,{BASE}", free_port()?);
    let ds1 = origin_server(&dead)?;
    let conn = LdapConnection::connect("127.0.0.1", ds1.port(), options(false, true))?;
    let result = conn.process_search(&everything())?;
    assert_eq!(result.result_code(), ResultCode::REFERRAL);
    assert_eq!(result.entry_count(), 3);
    assert_eq!(result.reference_count(), 1);
    assert!(matches!(conn.search(&everything()), Err(LdapError::ReferralUnresolvable(_))));
    Ok(())
}
