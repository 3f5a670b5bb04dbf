//! Localized region names used in display names

use once_cell::sync::Lazy;
use std::collections::HashMap;

static LOCALIZED: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("US", "美国"), ("CN", "中国"), ("JP", "日本"), ("KR", "韩国"),
        ("GB", "英国"), ("DE", "德国"), ("FR", "法国"), ("RU", "俄罗斯"),
        ("IN", "印度"), ("BR", "巴西"), ("CA", "加拿大"), ("AU", "澳大利亚"),
        ("IT", "意大利"), ("ES", "西班牙"), ("NL", "荷兰"), ("SE", "瑞典"),
        ("TW", "台湾"), ("HK", "香港"), ("SG", "新加坡"), ("ID", "印尼"),
        ("MY", "马来西亚"), ("TH", "泰国"), ("VN", "越南"), ("PH", "菲律宾"),
        ("FI", "芬兰"), ("PL", "波兰"), ("UA", "乌克兰"), ("TR", "土耳其"),
        ("AR", "阿根廷"), ("MX", "墨西哥"), ("CL", "智利"), ("CO", "哥伦比亚"),
        ("PE", "秘鲁"), ("EC", "厄瓜多尔"), ("VE", "委内瑞拉"), ("BO", "玻利维亚"),
        ("PY", "巴拉圭"), ("UY", "乌拉圭"), ("CR", "哥斯达黎加"), ("PA", "巴拿马"),
        ("DO", "多米尼加"), ("GT", "危地马拉"), ("HN", "洪都拉斯"), ("SV", "萨尔瓦多"),
        ("NI", "尼加拉瓜"), ("JM", "牙买加"), ("TT", "特立尼达"), ("BS", "巴哈马"),
        ("BH", "巴林"), ("SA", "沙特"), ("AE", "阿联酋"), ("IL", "以色列"),
        ("IQ", "伊拉克"), ("IR", "伊朗"), ("PK", "巴基斯坦"), ("BD", "孟加拉国"),
        ("LK", "斯里兰卡"), ("NP", "尼泊尔"), ("MM", "缅甸"), ("KH", "柬埔寨"),
        ("LA", "老挝"), ("MN", "蒙古"), ("NZ", "新西兰"), ("ZA", "南非"),
        ("EG", "埃及"), ("NG", "尼日利亚"), ("KE", "肯尼亚"), ("MA", "摩洛哥"),
        ("GH", "加纳"), ("TZ", "坦桑尼亚"), ("ET", "埃塞俄比亚"), ("DZ", "阿尔及利亚"),
        ("TN", "突尼斯"), ("SN", "塞内加尔"), ("ZW", "津巴布韦"), ("LS", "莱索托"),
        ("UG", "乌干达"), ("RW", "卢旺达"), ("MU", "毛里求斯"), ("SC", "塞舌尔"),
        ("BE", "比利时"), ("CH", "瑞士"), ("AT", "奥地利"), ("PT", "葡萄牙"),
        ("IE", "爱尔兰"), ("NO", "挪威"), ("DK", "丹麦"), ("IS", "冰岛"),
        ("CZ", "捷克"), ("HU", "匈牙利"), ("RO", "罗马尼亚"), ("BG", "保加利亚"),
        ("GR", "希腊"), ("SK", "斯洛伐克"), ("LT", "立陶宛"), ("LV", "拉脱维亚"),
        ("EE", "爱沙尼亚"), ("HR", "克罗地亚"), ("RS", "塞尔维亚"), ("BA", "波黑"),
        ("SI", "斯洛文尼亚"), ("MK", "北马其顿"), ("AL", "阿尔巴尼亚"), ("ME", "黑山"),
        ("BY", "白俄罗斯"), ("KZ", "哈萨克斯坦"), ("UZ", "乌兹别克斯坦"), ("KG", "吉尔吉斯斯坦"),
        ("AZ", "阿塞拜疆"), ("GE", "格鲁吉亚"), ("AM", "亚美尼亚"), ("CY", "塞浦路斯"),
        ("LU", "卢森堡"), ("MT", "马耳他"), ("KY", "开曼群岛"), ("PR", "波多黎各"),
        ("XX", "未知"),
    ]
    .into_iter()
    .collect()
});

/// Localized name of a region code, if known
pub fn localized_name(code: &str) -> Option<&'static str> {
    LOCALIZED.get(code).copied()
}
