use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use docsite::offline::{
    ClientMessage, MessageRelay, OfflineError, UpdateInfo, UpdateSource, WorkerError, WorkerHost,
    WorkerScript, parse_update_json,
};

/// Shared, ordered record of calls made to the fakes.
pub type CallLog = Rc<RefCell<Vec<String>>>;

pub fn call_log() -> CallLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// Update source answering from a queue; the last answer repeats.
pub struct ScriptedSource {
    answers: RefCell<VecDeque<Result<String, String>>>,
    log: CallLog,
}

impl ScriptedSource {
    pub fn new(log: &CallLog, answers: Vec<Result<&str, &str>>) -> Self {
        Self {
            answers: RefCell::new(
                answers
                    .into_iter()
                    .map(|answer| answer.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            log: Rc::clone(log),
        }
    }

    pub fn always(log: &CallLog, body: &str) -> Self {
        Self::new(log, vec![Ok(body)])
    }
}

impl UpdateSource for ScriptedSource {
    fn fetch_latest(&self) -> Result<UpdateInfo, OfflineError> {
        self.log.borrow_mut().push("fetch".into());
        let mut answers = self.answers.borrow_mut();
        let answer = if answers.len() > 1 {
            answers.pop_front()
        } else {
            answers.front().cloned()
        };
        match answer {
            Some(Ok(body)) => parse_update_json(body.as_bytes()),
            Some(Err(message)) => Err(OfflineError::Http(message)),
            None => Err(OfflineError::Http("no answer scripted".into())),
        }
    }
}

/// Worker host that records registrations and keeps the relay for the test.
pub struct RecordingHost {
    log: CallLog,
    relay: Rc<RefCell<Option<MessageRelay>>>,
    registered: bool,
    register_error: Option<String>,
    installing: Rc<Cell<bool>>,
}

impl RecordingHost {
    pub fn new(log: &CallLog) -> (Self, Rc<RefCell<Option<MessageRelay>>>) {
        let relay = Rc::new(RefCell::new(None));
        (
            Self {
                log: Rc::clone(log),
                relay: Rc::clone(&relay),
                registered: false,
                register_error: None,
                installing: Rc::new(Cell::new(false)),
            },
            relay,
        )
    }

    /// Make every registration fail with `message`.
    pub fn failing_register(mut self, message: &str) -> Self {
        self.register_error = Some(message.to_string());
        self
    }

    /// Flag reported by `is_installing`, shared with the test.
    pub fn installing_flag(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.installing)
    }
}

impl WorkerHost for RecordingHost {
    fn register(
        &mut self,
        script: &WorkerScript,
        _scope: &str,
        relay: MessageRelay,
    ) -> Result<(), WorkerError> {
        self.log.borrow_mut().push(format!(
            "register preferOnline={} version={}",
            script.prefer_online,
            script.version.as_deref().unwrap_or("undefined")
        ));
        if let Some(message) = &self.register_error {
            return Err(WorkerError::Register(message.clone()));
        }
        *self.relay.borrow_mut() = Some(relay);
        self.registered = true;
        Ok(())
    }

    fn unregister(&mut self) -> Result<bool, WorkerError> {
        self.log.borrow_mut().push("unregister".into());
        Ok(std::mem::replace(&mut self.registered, false))
    }

    fn is_installing(&self) -> bool {
        self.installing.get()
    }

    fn post_message(&mut self, message: ClientMessage) -> Result<(), WorkerError> {
        if !self.registered {
            return Err(WorkerError::NoActiveWorker(message));
        }
        self.log.borrow_mut().push(format!("post {message:?}"));
        Ok(())
    }
}
