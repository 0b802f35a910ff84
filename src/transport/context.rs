//! Per-hop scratch state.
//!
//! Everything needed to carry one request/response round trip lives here,
//! explicitly, rather than being scattered across the exchange loop: the
//! wire serializer, the framing parser, the content decoder, and the
//! control-flow outcome of any hooks that fired. A redirect or retry simply
//! builds a fresh context.

use std::collections::VecDeque;

use crate::base::NetError;
use crate::http::parser::{BodyPlan, ContentDecoder, ParseEvent, ResponseParser};
use crate::http::request::{HookAction, Request};
use crate::http::response::Response;
use crate::http::serializer::RequestSerializer;

pub(crate) struct AttemptContext {
    pub serializer: RequestSerializer,
    pub parser: ResponseParser,
    decoder: ContentDecoder,
    /// Declared body size, for download progress reporting.
    body_total: Option<u64>,
    /// Set when a hook asked to restart with a different request.
    pub restart: Option<Box<Request>>,
    /// The body plan turned out to be close-delimited, so the connection
    /// cannot be reused.
    pub eof_delimited: bool,
    pub complete: bool,
}

impl AttemptContext {
    pub fn new(serializer: RequestSerializer) -> Self {
        Self {
            serializer,
            parser: ResponseParser::new(),
            decoder: ContentDecoder::Identity,
            body_total: None,
            restart: None,
            eof_delimited: false,
            complete: false,
        }
    }

    /// Apply parser events to the response, firing hooks along the way.
    ///
    /// Returns early (without error) when a hook requests a restart; the
    /// caller checks `self.restart`.
    pub fn apply_events(
        &mut self,
        events: Vec<ParseEvent>,
        request: &Request,
        response: &mut Response,
    ) -> Result<(), NetError> {
        let mut queue: VecDeque<ParseEvent> = events.into();
        while let Some(event) = queue.pop_front() {
            match event {
                ParseEvent::HeaderLine(line) => {
                    if let Some(hook) = &request.hooks.on_header_line {
                        if self.take_action(hook(&line), "on_header_line")? {
                            return Ok(());
                        }
                    }
                    response.put_header_line(&line)?;
                }
                ParseEvent::HeadComplete => {
                    if let Some(hook) = &request.hooks.on_header {
                        if self.take_action(hook(response), "on_header")? {
                            return Ok(());
                        }
                    }
                    let plan = self.pick_body_plan(request, response);
                    self.decoder = if request.use_encoding {
                        ContentDecoder::from_encoding(response.header("Content-Encoding"))
                    } else {
                        ContentDecoder::Identity
                    };
                    // Installing the plan may release buffered body bytes.
                    for event in self.parser.set_body_plan(plan)? {
                        queue.push_back(event);
                    }
                }
                ParseEvent::BodyData(data) => {
                    let decoded = self.decoder.decode(&data)?;
                    response.body.write_all(&decoded)?;
                    if let Some(hook) = &request.hooks.on_download {
                        hook(self.parser.body_received(), self.body_total);
                    }
                }
                ParseEvent::Complete { .. } => {
                    let tail = self.decoder.finish()?;
                    response.body.write_all(&tail)?;
                    self.complete = true;
                }
            }
        }
        Ok(())
    }

    fn pick_body_plan(&mut self, request: &Request, response: &Response) -> BodyPlan {
        if request.method.is_head() {
            return BodyPlan::None;
        }
        let chunked = response
            .header("Transfer-Encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false);
        if chunked {
            return BodyPlan::Chunked;
        }
        if let Some(len) = response
            .header("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            self.body_total = Some(len);
            return BodyPlan::Length(len);
        }
        self.eof_delimited = true;
        BodyPlan::UntilClose
    }

    /// Translate a hook verdict. True means stop processing (restart).
    fn take_action(
        &mut self,
        action: HookAction,
        hook: &'static str,
    ) -> Result<bool, NetError> {
        match action {
            HookAction::Continue => Ok(false),
            HookAction::Restart(request) => {
                self.restart = Some(request);
                Ok(true)
            }
            HookAction::Cancel => Err(NetError::Cancelled),
            HookAction::Fail(message) => Err(NetError::Callback { hook, message }),
        }
    }
}
