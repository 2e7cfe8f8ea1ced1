//! Vendor resource URLs.
//!
//! Every pupil resource lives under `<rest_url>/<unit symbol>/api/mobile/`.

use url::Url;

use crate::error::Error;
use crate::register::PupilSession;
use crate::types::{DateRange, MessageBox, format_day};

/// Sentinel the vendor uses for "from the beginning" paging.
const FIRST_ID: &str = "-2147483648";
const PAGE_SIZE: &str = "500";
const SMALL_PAGE_SIZE: &str = "100";

/// `<rest_url>/api/mobile/register/hebe?mode=2`
pub(crate) fn register_hebe(rest_url: &Url) -> Result<Url, Error> {
    let mut url = join(rest_url, "api/mobile/register/hebe")?;
    url.query_pairs_mut().append_pair("mode", "2");
    Ok(url)
}

pub(crate) fn lessons(session: &PupilSession, range: &DateRange) -> Result<Url, Error> {
    paged_range(session, "schedule/withchanges/byPupil", range)
}

pub(crate) fn changed_lessons(session: &PupilSession, range: &DateRange) -> Result<Url, Error> {
    paged_range(session, "schedule/changed/byPupil", range)
}

pub(crate) fn attendance(session: &PupilSession, range: &DateRange) -> Result<Url, Error> {
    paged_range(session, "lesson/byPupil", range)
}

pub(crate) fn homework(session: &PupilSession, range: &DateRange) -> Result<Url, Error> {
    unit_range(session, "homework/byPupil", range)
}

pub(crate) fn exams(session: &PupilSession, range: &DateRange) -> Result<Url, Error> {
    unit_range(session, "exam/byPupil", range)
}

/// Grades of the current period.
pub(crate) fn grades(session: &PupilSession) -> Result<Url, Error> {
    let period = session
        .current_period
        .ok_or_else(|| Error::InvalidArgument("pupil has no current period".into()))?;
    let mut url = resource(session, "grade/byPupil")?;
    url.query_pairs_mut()
        .append_pair("unitId", &unit_id(session)?)
        .append_pair("pupilId", &session.pupil_id.to_string())
        .append_pair("periodId", &period.to_string())
        .append_pair("pageSize", SMALL_PAGE_SIZE);
    Ok(url)
}

pub(crate) fn messages(session: &PupilSession, folder: MessageBox) -> Result<Url, Error> {
    let mut url = resource(session, &format!("messages/{}/byBox", folder.as_path()))?;
    url.query_pairs_mut()
        .append_pair("box", message_box(session)?)
        .append_pair("lastId", FIRST_ID)
        .append_pair("pupilId", &session.pupil_id.to_string())
        .append_pair("pageSize", PAGE_SIZE);
    Ok(url)
}

pub(crate) fn address_book(session: &PupilSession) -> Result<Url, Error> {
    let mut url = resource(session, "addressbook")?;
    url.query_pairs_mut().append_pair("box", message_box(session)?);
    Ok(url)
}

pub(crate) fn lucky_number(session: &PupilSession, day: time::Date) -> Result<Url, Error> {
    let mut url = resource(session, "school/lucky")?;
    url.query_pairs_mut()
        .append_pair("constituentId", &session.constituent_id.to_string())
        .append_pair("day", &format_day(day)?);
    Ok(url)
}

fn paged_range(session: &PupilSession, path: &str, range: &DateRange) -> Result<Url, Error> {
    let mut url = resource(session, path)?;
    url.query_pairs_mut()
        .append_pair("pupilId", &session.pupil_id.to_string())
        .append_pair("dateFrom", &format_day(range.from())?)
        .append_pair("dateTo", &format_day(range.to())?)
        .append_pair("lastId", FIRST_ID)
        .append_pair("pageSize", PAGE_SIZE);
    Ok(url)
}

fn unit_range(session: &PupilSession, path: &str, range: &DateRange) -> Result<Url, Error> {
    let mut url = resource(session, path)?;
    url.query_pairs_mut()
        .append_pair("unitId", &unit_id(session)?)
        .append_pair("pupilId", &session.pupil_id.to_string())
        .append_pair("dateFrom", &format_day(range.from())?)
        .append_pair("dateTo", &format_day(range.to())?)
        .append_pair("pageSize", SMALL_PAGE_SIZE);
    Ok(url)
}

fn resource(session: &PupilSession, path: &str) -> Result<Url, Error> {
    let unit = session
        .unit
        .as_ref()
        .ok_or_else(|| Error::InvalidArgument("pupil has no unit".into()))?;
    join(&session.rest_url, &format!("{}/api/mobile/{path}", unit.symbol))
}

fn unit_id(session: &PupilSession) -> Result<String, Error> {
    session
        .unit
        .as_ref()
        .map(|unit| unit.id.to_string())
        .ok_or_else(|| Error::InvalidArgument("pupil has no unit".into()))
}

fn message_box(session: &PupilSession) -> Result<&str, Error> {
    session
        .message_box
        .as_deref()
        .ok_or_else(|| Error::InvalidArgument("pupil has no message box".into()))
}

fn join(base: &Url, path: &str) -> Result<Url, Error> {
    let base = base.as_str().trim_end_matches('/');
    format!("{base}/{path}")
        .parse()
        .map_err(|e| Error::InvalidArgument(format!("{base}/{path}: {e}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::date;

    use super::*;
    use crate::register::UnitInfo;
    use crate::types::{ConstituentId, PeriodId, PupilId, UnitId};

    fn session() -> PupilSession {
        PupilSession {
            rest_url: "https://lekcjaplus.vulcan.net.pl/powiatwulkanowy/".parse().unwrap(),
            symbol_number: "S1".into(),
            pupil_id: PupilId(42),
            constituent_id: ConstituentId(7),
            unit: Some(UnitInfo {
                id: UnitId(3),
                symbol: "000088".into(),
            }),
            message_box: Some("box-key".into()),
            current_period: Some(PeriodId(11)),
            envelope: json!({}),
        }
    }

    fn week() -> DateRange {
        DateRange::new(date!(2026 - 10 - 12), date!(2026 - 10 - 18)).unwrap()
    }

    const BASE: &str = "https://lekcjaplus.vulcan.net.pl/powiatwulkanowy/000088/api/mobile";

    #[test]
    fn register_hebe_url() {
        let rest_url: Url = "https://lekcjaplus.vulcan.net.pl/powiatwulkanowy".parse().unwrap();
        assert_eq!(
            register_hebe(&rest_url).unwrap().as_str(),
            "https://lekcjaplus.vulcan.net.pl/powiatwulkanowy/api/mobile/register/hebe?mode=2"
        );
    }

    #[test]
    fn lessons_url() {
        assert_eq!(
            lessons(&session(), &week()).unwrap().as_str(),
            format!(
                "{BASE}/schedule/withchanges/byPupil?pupilId=42&dateFrom=2026-10-12&dateTo=2026-10-18&lastId=-2147483648&pageSize=500"
            )
        );
    }

    #[test]
    fn exams_url_carries_unit() {
        assert_eq!(
            exams(&session(), &week()).unwrap().as_str(),
            format!(
                "{BASE}/exam/byPupil?unitId=3&pupilId=42&dateFrom=2026-10-12&dateTo=2026-10-18&pageSize=100"
            )
        );
    }

    #[test]
    fn grades_url_uses_current_period() {
        assert_eq!(
            grades(&session()).unwrap().as_str(),
            format!("{BASE}/grade/byPupil?unitId=3&pupilId=42&periodId=11&pageSize=100")
        );
        let mut no_period = session();
        no_period.current_period = None;
        assert!(matches!(grades(&no_period), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn messages_url_per_folder() {
        assert_eq!(
            messages(&session(), MessageBox::Sent).unwrap().as_str(),
            format!("{BASE}/messages/sent/byBox?box=box-key&lastId=-2147483648&pupilId=42&pageSize=500")
        );
    }

    #[test]
    fn lucky_number_url() {
        assert_eq!(
            lucky_number(&session(), date!(2026 - 10 - 15)).unwrap().as_str(),
            format!("{BASE}/school/lucky?constituentId=7&day=2026-10-15")
        );
    }

    #[test]
    fn missing_unit_or_box() {
        let mut bare = session();
        bare.unit = None;
        bare.message_box = None;
        assert!(matches!(lessons(&bare, &week()), Err(Error::InvalidArgument(_))));
        let mut no_box = session();
        no_box.message_box = None;
        assert!(matches!(address_book(&no_box), Err(Error::InvalidArgument(_))));
    }
}
