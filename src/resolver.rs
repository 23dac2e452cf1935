//! Querying the nameservers of a zone.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use domain::base::iana::OptRcode;
use domain::base::{Message, MessageBuilder, ParsedName, Rtype, ToName};
use domain::net::client::{dgram, dgram_stream, multi_stream};
use domain::net::client::protocol::{TcpConnect, UdpConnect};
use domain::net::client::request::{ComposeRequest, RequestMessage, SendRequest};
use domain::rdata::AllRecordData;
use rand::Rng;
use tracing::{debug, warn};

use crate::store::{ObservedKey, ObservedSignature, ZoneName};

//------------ ResolverConfig ------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolverConfig {
    /// How long to wait for a single answer.
    pub timeout: Duration,

    /// How many times a query is sent before giving up.
    pub max_attempts: u32,

    /// The port the nameservers listen on.
    pub port: u16,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            timeout: Duration::from_secs(3),
            max_attempts: 5,
            port: 53,
        }
    }
}

//------------ Answer --------------------------------------------------------

/// The records of one type at the apex of a zone, with their signatures.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Answer {
    pub records: Vec<AnswerRecord>,

    /// The RRSIGs covering the queried type.
    pub signatures: Vec<ObservedSignature>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnswerRecord {
    pub ttl: u32,
    pub data: RecordData,
}

/// The parts of record data that are tracked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordData {
    Dnskey(ObservedKey),
    Soa { serial: u32 },
    Ns(String),
}

impl Answer {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ObservedKey> + '_ {
        self.records.iter().filter_map(|r| match &r.data {
            RecordData::Dnskey(key) => Some(key),
            _ => None,
        })
    }

    /// The serial of the first SOA record.
    pub fn serial(&self) -> Option<u32> {
        self.records.iter().find_map(|r| match r.data {
            RecordData::Soa { serial } => Some(serial),
            _ => None,
        })
    }

    /// The TTL of the record set.
    ///
    /// Records of one set should share a TTL. If they don't, the largest
    /// one is how long a resolver may keep the set.
    pub fn ttl(&self) -> Option<u32> {
        self.records.iter().map(|r| r.ttl).max()
    }
}

//------------ ResolveError --------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no answer after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("query refused: {0}")]
    Refused(String),
}

//------------ ZoneResolver --------------------------------------------------

/// Something that can ask a specific nameserver about a zone.
#[allow(async_fn_in_trait)]
pub trait ZoneResolver {
    async fn resolve(
        &self,
        zone: &ZoneName,
        rtype: Rtype,
        nameserver: IpAddr,
    ) -> Result<Answer, ResolveError>;
}

//------------ DnsResolver ---------------------------------------------------

/// Sends DNSSEC OK queries over UDP, falling back to TCP on truncation.
pub struct DnsResolver {
    config: ResolverConfig,
}

impl DnsResolver {
    pub fn new(config: ResolverConfig) -> Self {
        DnsResolver { config }
    }

    async fn query_once(
        &self,
        zone: &ZoneName,
        rtype: Rtype,
        server: SocketAddr,
    ) -> Result<Message<Bytes>, String> {
        let udp_connect = UdpConnect::new(server);
        let tcp_connect = TcpConnect::new(server);
        // Each attempt sends exactly one datagram, retries are ours.
        let mut dgram_config = dgram::Config::new();
        dgram_config.set_read_timeout(self.config.timeout);
        dgram_config.set_max_retries(0);
        let config =
            dgram_stream::Config::from_parts(dgram_config, multi_stream::Config::default());
        let (conn, transport) =
            dgram_stream::Connection::with_config(udp_connect, tcp_connect, config);
        tokio::spawn(transport.run());

        let msg = MessageBuilder::new_vec();
        let mut msg = msg.question();
        msg.push((zone.as_name(), rtype))
            .map_err(|e| format!("cannot build query: {e}"))?;
        let mut req = RequestMessage::new(msg).map_err(|e| format!("cannot build query: {e}"))?;
        req.set_dnssec_ok(true);

        let mut request = conn.send_request(req);
        request.get_response().await.map_err(|e| e.to_string())
    }
}

impl ZoneResolver for DnsResolver {
    async fn resolve(
        &self,
        zone: &ZoneName,
        rtype: Rtype,
        nameserver: IpAddr,
    ) -> Result<Answer, ResolveError> {
        let server = SocketAddr::new(nameserver, self.config.port);
        let timeout = self.config.timeout;
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            debug!("Querying {server} for {zone}/{rtype} (attempt {attempt})");
            match tokio::time::timeout(timeout, self.query_once(zone, rtype, server)).await {
                Ok(Ok(response)) => return parse_answer(zone, rtype, &response),
                Ok(Err(e)) => warn!("{zone}/{rtype} query to {server} failed: {e}"),
                Err(_) => debug!("{zone}/{rtype} query to {server} timed out"),
            }
            if attempt < attempts {
                let factor = rand::thread_rng().gen_range(1..=3u32);
                tokio::time::sleep(timeout * factor).await;
            }
        }
        Err(ResolveError::Timeout { attempts })
    }
}

/// Pick the records of `rtype` owned by `zone` and their signatures.
fn parse_answer(
    zone: &ZoneName,
    rtype: Rtype,
    response: &Message<Bytes>,
) -> Result<Answer, ResolveError> {
    let rcode = response.opt_rcode();
    if rcode != OptRcode::NOERROR {
        return Err(ResolveError::Refused(rcode.to_string()));
    }

    let malformed = |e: domain::base::wire::ParseError| ResolveError::Malformed(e.to_string());
    let mut answer = Answer::default();
    let section = response.answer().map_err(malformed)?;
    for record in section.limit_to_in::<AllRecordData<Bytes, ParsedName<Bytes>>>() {
        let record = record.map_err(malformed)?;
        if !record.owner().name_eq(zone.as_name()) {
            continue;
        }
        let ttl = record.ttl().as_secs();
        let data = match record.data() {
            AllRecordData::Dnskey(key) if rtype == Rtype::DNSKEY => {
                RecordData::Dnskey(ObservedKey {
                    flags: key.flags(),
                    protocol: key.protocol(),
                    algorithm: key.algorithm().to_int(),
                    public_key: key.public_key().to_vec(),
                    key_tag: key.key_tag(),
                })
            }
            AllRecordData::Soa(soa) if rtype == Rtype::SOA => RecordData::Soa {
                serial: soa.serial().into_int(),
            },
            AllRecordData::Ns(ns) if rtype == Rtype::NS => RecordData::Ns(ns.nsdname().to_string()),
            AllRecordData::Rrsig(sig) if sig.type_covered() == rtype => {
                answer.signatures.push(ObservedSignature {
                    rtype: rtype.to_int(),
                    ttl,
                    key_tag: sig.key_tag(),
                    algorithm: sig.algorithm().to_int(),
                    inception: sig.inception().into_int(),
                    expiration: sig.expiration().into_int(),
                    signature: sig.signature().to_vec(),
                });
                continue;
            }
            _ => continue,
        };
        answer.records.push(AnswerRecord { ttl, data });
    }
    Ok(answer)
}
