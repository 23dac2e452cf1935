use std::borrow::Cow;
use std::collections::HashMap;
use std::ffi::OsString;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::{fmt, io};

use domain::base::Rtype;

use crate::error::Error;
use crate::resolver::{Answer, AnswerRecord, RecordData, ResolveError, ResolverConfig, ZoneResolver};
use crate::store::{ObservedKey, ObservedSignature, ZoneName};
use crate::{parse_args, run, Args};

use super::Env;
use super::Stream;

/// A command to run in a [`FakeEnv`]
///
/// This is used for testing the utilities, running the real code in a fake
/// environment.
#[derive(Clone)]
pub struct FakeCmd {
    /// The command to run, including `argv[0]`
    cmd: Vec<OsString>,
    cwd: Option<PathBuf>,
    now: u32,
    resolver: FakeResolver,
}

/// The result of running a [`FakeCmd`]
///
/// The fields are public to allow for easy assertions in tests.
#[derive(Debug)]
pub struct FakeResult {
    pub exit_code: u8,
    pub stdout: String,
    pub stderr: String,
}

/// An environment that mocks interaction with the outside world
pub struct FakeEnv {
    /// Description of the command being run
    pub cmd: FakeCmd,

    /// The mocked stdout
    pub stdout: FakeStream,

    /// The mocked stderr
    pub stderr: FakeStream,
}

impl Env for FakeEnv {
    fn args_os(&self) -> impl Iterator<Item = OsString> {
        self.cmd.cmd.iter().map(Into::into)
    }

    fn stdout(&self) -> Stream<impl io::Write> {
        Stream::new(self.stdout.clone(), false)
    }

    fn stderr(&self) -> Stream<impl io::Write + Send + Sync + 'static + use<>> {
        Stream::new(self.stderr.clone(), false)
    }

    fn in_cwd<'a>(&self, path: &'a impl AsRef<Path>) -> Cow<'a, Path> {
        match &self.cmd.cwd {
            Some(cwd) => cwd.join(path).into(),
            None => path.as_ref().into(),
        }
    }

    fn seconds_since_epoch(&self) -> u32 {
        self.cmd.now
    }

    fn zone_resolver(&self, _config: &ResolverConfig) -> impl ZoneResolver {
        self.cmd.resolver.clone()
    }
}

impl FakeCmd {
    /// Construct a new [`FakeCmd`] with a given command.
    ///
    /// The command can consist of multiple strings to specify a subcommand.
    pub fn new<S: Into<OsString>>(cmd: impl IntoIterator<Item = S>) -> Self {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            cwd: None,
            now: 0,
            resolver: FakeResolver::default(),
        }
    }

    pub fn cwd(&self, path: impl AsRef<Path>) -> Self {
        Self {
            cwd: Some(path.as_ref().to_path_buf()),
            ..self.clone()
        }
    }

    /// Pin the clock of the environment to the given UNIX time.
    pub fn now(&self, seconds: u32) -> Self {
        Self {
            now: seconds,
            ..self.clone()
        }
    }

    /// Answer resolver queries from the given scripted responses.
    pub fn resolver(&self, resolver: FakeResolver) -> Self {
        Self {
            resolver,
            ..self.clone()
        }
    }

    /// Add arguments to a clone of the [`FakeCmd`]
    ///
    /// ```rust,ignore
    /// let cmd = FakeCmd::new(["keywatch"])
    /// let sub1 = cmd.args(["sub1"]);  // keywatch sub1
    /// let sub2 = cmd.args(["sub2"]);  // keywatch sub2
    /// let sub3 = sub2.args(["sub3"]); // keywatch sub2 sub3
    /// ```
    pub fn args<S: Into<OsString>>(&self, args: impl IntoIterator<Item = S>) -> Self {
        let mut new = self.clone();
        new.cmd.extend(args.into_iter().map(Into::into));
        new
    }

    /// Build the [`FakeEnv`] this command would run in.
    pub fn env(&self) -> FakeEnv {
        FakeEnv {
            cmd: self.clone(),
            stdout: Default::default(),
            stderr: Default::default(),
        }
    }

    /// Parse the arguments of this [`FakeCmd`] and return the result
    pub fn parse(&self) -> Result<Args, Error> {
        parse_args(self.env())
    }

    /// Run the [`FakeCmd`] in a [`FakeEnv`], returning a [`FakeResult`]
    pub fn run(&self) -> FakeResult {
        let env = self.env();

        let exit_code = run(&env);

        FakeResult {
            exit_code,
            stdout: env.get_stdout(),
            stderr: env.get_stderr(),
        }
    }
}

impl FakeEnv {
    pub fn get_stdout(&self) -> String {
        String::from_utf8(self.stdout.0.lock().unwrap().clone()).unwrap()
    }

    pub fn get_stderr(&self) -> String {
        String::from_utf8(self.stderr.0.lock().unwrap().clone()).unwrap()
    }
}

/// A type to used to mock stdout and stderr
#[derive(Clone, Default)]
pub struct FakeStream(Arc<Mutex<Vec<u8>>>);

impl io::Write for FakeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // do nothing
        Ok(())
    }
}

impl fmt::Display for FakeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(std::str::from_utf8(&self.0.lock().unwrap()).unwrap())
    }
}

/// A resolver answering from a fixed table of responses
///
/// Queries without a scripted response time out, the way an unreachable
/// nameserver would.
#[derive(Clone, Default)]
pub struct FakeResolver {
    answers: HashMap<(ZoneName, Rtype), Result<Answer, ResolveError>>,
}

impl FakeResolver {
    pub fn answer(mut self, zone: &str, rtype: Rtype, answer: Answer) -> Self {
        self.answers
            .insert((zone.parse().unwrap(), rtype), Ok(answer));
        self
    }

    pub fn fail(mut self, zone: &str, rtype: Rtype, error: ResolveError) -> Self {
        self.answers
            .insert((zone.parse().unwrap(), rtype), Err(error));
        self
    }

    /// Script complete DNSKEY, SOA and NS answers for a signed zone.
    ///
    /// All three record sets have a TTL of 3600 and carry a single
    /// signature made by `signer`. Signatures differ per serial.
    pub fn signed_zone(self, zone: &str, serial: u32, keys: &[ObservedKey], signer: u16) -> Self {
        let signature = |rtype: Rtype| ObservedSignature {
            rtype: rtype.to_int(),
            ttl: 3600,
            key_tag: signer,
            algorithm: 13,
            inception: serial,
            expiration: serial + 1,
            signature: format!("{zone} {rtype} {serial} by {signer}").into_bytes(),
        };
        let scripted = |rtype: Rtype, data: Vec<RecordData>| Answer {
            records: data
                .into_iter()
                .map(|data| AnswerRecord { ttl: 3600, data })
                .collect(),
            signatures: vec![signature(rtype)],
        };

        let dnskey = keys.iter().cloned().map(RecordData::Dnskey).collect();
        let soa = vec![RecordData::Soa { serial }];
        let ns = vec![RecordData::Ns(format!("ns.{zone}"))];
        self.answer(zone, Rtype::DNSKEY, scripted(Rtype::DNSKEY, dnskey))
            .answer(zone, Rtype::SOA, scripted(Rtype::SOA, soa))
            .answer(zone, Rtype::NS, scripted(Rtype::NS, ns))
    }
}

impl ZoneResolver for FakeResolver {
    async fn resolve(
        &self,
        zone: &ZoneName,
        rtype: Rtype,
        _nameserver: IpAddr,
    ) -> Result<Answer, ResolveError> {
        self.answers
            .get(&(zone.clone(), rtype))
            .cloned()
            .unwrap_or(Err(ResolveError::Timeout { attempts: 1 }))
    }
}
