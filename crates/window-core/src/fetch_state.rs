use crate::{
    cursor::HistoryQuery,
    error::{ApiError, WindowError},
    types::{FetchDirection, FetchStatus, FetchStatusSet},
};

/// Status of the last request issued in one direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    status: FetchStatus,
    error: Option<ApiError>,
    params: Option<HistoryQuery>,
}

impl FetchRequest {
    pub fn status(&self) -> FetchStatus {
        self.status
    }

    pub fn error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }

    /// Parameters of the last issued request.
    pub fn params(&self) -> Option<&HistoryQuery> {
        self.params.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.status == FetchStatus::Loading
    }

    /// Enter `Loading`. Rejected while a request is already in flight so that
    /// duplicate triggers are dropped rather than queued.
    pub fn begin(
        &mut self,
        direction: FetchDirection,
        params: HistoryQuery,
    ) -> Result<(), WindowError> {
        self.transition_from_any_of(
            direction,
            &[FetchStatus::Init, FetchStatus::Success, FetchStatus::Fail],
            FetchStatus::Loading,
        )?;
        self.error = None;
        self.params = Some(params);
        Ok(())
    }

    pub fn succeed(&mut self, direction: FetchDirection) -> Result<(), WindowError> {
        self.transition_from_any_of(direction, &[FetchStatus::Loading], FetchStatus::Success)
    }

    pub fn fail(&mut self, direction: FetchDirection, error: ApiError) -> Result<(), WindowError> {
        self.transition_from_any_of(direction, &[FetchStatus::Loading], FetchStatus::Fail)?;
        self.error = Some(error);
        Ok(())
    }

    /// Drop an in-flight request whose result will be ignored.
    pub fn reset(&mut self) {
        self.status = FetchStatus::Init;
        self.error = None;
    }

    fn transition_from_any_of(
        &mut self,
        direction: FetchDirection,
        expected: &[FetchStatus],
        next: FetchStatus,
    ) -> Result<(), WindowError> {
        if !expected.contains(&self.status) {
            return Err(WindowError::InvalidTransition {
                direction,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// One `FetchRequest` per direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequests {
    previous: FetchRequest,
    next: FetchRequest,
    latest: FetchRequest,
    around: FetchRequest,
}

impl FetchRequests {
    pub fn get(&self, direction: FetchDirection) -> &FetchRequest {
        match direction {
            FetchDirection::Previous => &self.previous,
            FetchDirection::Next => &self.next,
            FetchDirection::Latest => &self.latest,
            FetchDirection::Around => &self.around,
        }
    }

    pub fn get_mut(&mut self, direction: FetchDirection) -> &mut FetchRequest {
        match direction {
            FetchDirection::Previous => &mut self.previous,
            FetchDirection::Next => &mut self.next,
            FetchDirection::Latest => &mut self.latest,
            FetchDirection::Around => &mut self.around,
        }
    }

    pub fn statuses(&self) -> FetchStatusSet {
        FetchStatusSet {
            previous: self.previous.status,
            next: self.next.status,
            latest: self.latest.status,
            around: self.around.status,
        }
    }
}
